//! Service-Control client: the HTTP call factory (C5), the response
//! cache and usage aggregators built on top of it (C6).

pub mod aggregator;
pub mod call;
