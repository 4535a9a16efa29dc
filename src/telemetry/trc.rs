//! Tracing spans for outbound Service-Control attempts (§4.5: "Tracing
//! spans are started per attempt and closed on completion or
//! cancellation").
//!
//! Grounded on the teacher's `telemetry::trc::Tracer` (an
//! `opentelemetry_sdk` provider wrapped in a cloneable handle, built once
//! from config) trimmed of the CEL-driven request-log span builder: this
//! core only ever spans one thing, a single RPC attempt.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use opentelemetry::trace::{Span, SpanKind, Tracer as _, TracerProvider};
use opentelemetry::{Key, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
pub use traceparent::TraceParent;

#[derive(Clone, Debug)]
pub struct Tracer {
	tracer: Arc<opentelemetry_sdk::trace::SdkTracer>,
	provider: SdkTracerProvider,
}

#[derive(serde::Serialize, Clone, Debug, Default)]
pub struct Config {
	pub endpoint: Option<String>,
}

mod semconv {
	use opentelemetry::Key;

	pub static RPC_OPERATION: Key = Key::from_static_str("rpc.method");
	pub static ATTEMPT: Key = Key::from_static_str("rpc.attempt");
	pub static URL: Key = Key::from_static_str("url.full");
	pub static STATUS_CODE: Key = Key::from_static_str("http.response.status_code");
}

impl Tracer {
	pub fn new(cfg: &Config) -> anyhow::Result<Option<Tracer>> {
		let Some(ep) = &cfg.endpoint else {
			return Ok(None);
		};
		let provider = SdkTracerProvider::builder()
			.with_resource(
				Resource::builder()
					.with_service_name("svc-control-gateway")
					.build(),
			)
			.with_batch_exporter(
				opentelemetry_otlp::SpanExporter::builder()
					.with_tonic()
					.with_endpoint(ep)
					.build()?,
			)
			.build();
		let tracer = provider.tracer("svc-control-gateway");
		Ok(Some(Tracer {
			tracer: Arc::new(tracer),
			provider,
		}))
	}

	pub fn shutdown(&self) {
		let _ = self.provider.shutdown();
	}

	/// Record one Service-Control RPC attempt as a completed span, with
	/// `start`/`duration` taken from the caller so the span reflects the
	/// attempt's actual wall-clock bounds rather than when this function
	/// happens to run.
	pub fn record_call(
		&self,
		operation: &str,
		attempt: u32,
		url: &str,
		status: Option<u16>,
		start: SystemTime,
		duration: Duration,
	) {
		let mut attributes = vec![
			KeyValue::new(semconv::RPC_OPERATION.clone(), operation.to_string()),
			KeyValue::new(semconv::ATTEMPT.clone(), attempt as i64),
			KeyValue::new(semconv::URL.clone(), url.to_string()),
		];
		if let Some(status) = status {
			attributes.push(KeyValue::new(semconv::STATUS_CODE.clone(), status as i64));
		}
		let span_name = if attempt == 0 {
			operation.to_string()
		} else {
			format!("{operation} - Retry {attempt}")
		};
		self
			.tracer
			.span_builder(span_name)
			.with_start_time(start)
			.with_end_time(start + duration)
			.with_kind(SpanKind::Client)
			.with_attributes(attributes)
			.start(self.tracer.as_ref())
			.end();
	}
}

mod traceparent {
	use std::fmt;

	use opentelemetry::TraceFlags;
	use rand::Rng;

	/// A W3C traceparent header value (<https://www.w3.org/TR/trace-context/>),
	/// used to propagate the downstream request's trace context onto the
	/// Service-Control spans this module emits.
	#[derive(Clone, Eq, PartialEq)]
	pub struct TraceParent {
		pub version: u8,
		pub trace_id: u128,
		pub span_id: u64,
		pub flags: u8,
	}

	pub const TRACEPARENT_HEADER: &str = "traceparent";

	impl Default for TraceParent {
		fn default() -> Self {
			Self::new()
		}
	}

	impl TraceParent {
		pub fn new() -> Self {
			let mut rng = rand::rng();
			Self {
				version: 0,
				trace_id: rng.random(),
				span_id: rng.random(),
				flags: 0,
			}
		}

		pub fn from_headers(headers: &::http::HeaderMap) -> Option<Self> {
			headers
				.get(TRACEPARENT_HEADER)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| TraceParent::try_from(v).ok())
		}

		pub fn new_span(&self) -> Self {
			let mut rng = rand::rng();
			let mut cpy = self.clone();
			cpy.span_id = rng.random();
			cpy
		}

		pub fn trace_id(&self) -> String {
			format!("{:032x}", self.trace_id)
		}

		pub fn span_id(&self) -> String {
			format!("{:016x}", self.span_id)
		}

		pub fn is_sampled(&self) -> bool {
			(self.flags & TraceFlags::SAMPLED.to_u8()) != 0
		}
	}

	impl fmt::Debug for TraceParent {
		fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
			write!(
				f,
				"{:02x}-{:032x}-{:016x}-{:02x}",
				self.version, self.trace_id, self.span_id, self.flags
			)
		}
	}

	impl fmt::Display for TraceParent {
		fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
			write!(f, "{:032x}", self.trace_id)
		}
	}

	impl TryFrom<&str> for TraceParent {
		type Error = anyhow::Error;

		fn try_from(value: &str) -> Result<Self, Self::Error> {
			if value.len() != 55 {
				anyhow::bail!("traceparent malformed: length was {}", value.len())
			}
			let segs: Vec<&str> = value.split('-').collect();
			if segs.len() != 4 {
				anyhow::bail!("traceparent malformed: expected 4 segments")
			}
			Ok(Self {
				version: u8::from_str_radix(segs[0], 16)?,
				trace_id: u128::from_str_radix(segs[1], 16)?,
				span_id: u64::from_str_radix(segs[2], 16)?,
				flags: u8::from_str_radix(segs[3], 16)?,
			})
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn round_trips_through_display() {
			let tp = TraceParent::new();
			let s = format!("{tp:?}");
			let parsed = TraceParent::try_from(s.as_str()).unwrap();
			assert_eq!(tp, parsed);
		}

		#[test]
		fn rejects_wrong_length() {
			assert!(TraceParent::try_from("00-bad-length").is_err());
		}
	}
}
