//! Request-processing core for a Service-Control-backed API gateway:
//! URI-template parsing, path matching, path rewriting, OAuth2/JWT
//! token supply, Service-Control `:check`/`:allocateQuota`/`:report`
//! calls, and the request handler that wires them together.
//!
//! Grounded on Google's Extensible Service Proxy v2 (ESPv2) Envoy
//! filter — see `DESIGN.md` for the module-by-module mapping.

pub mod app;
pub mod config;
pub mod control;
pub mod converter;
pub mod error;
pub mod handler;
pub mod management;
pub mod matcher;
pub mod pb;
pub mod report;
pub mod rewrite;
pub mod serdes;
pub mod telemetry;
pub mod template;
pub mod token;

pub use app::Gateway;
pub use error::{ErrorKind, GatewayError};
pub use handler::{Decision, IncomingRequest, RequestHandler};
