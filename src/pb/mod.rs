//! Generated Service-Control wire messages (C5's request/response bodies).
//!
//! Built by `build.rs` from `proto/service_control.proto` with plain
//! `prost-build` (no service stub): the Service-Control RPCs are
//! `application/x-protobuf` POSTs, not gRPC calls.

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/svc_control_gateway.v1.rs"));
