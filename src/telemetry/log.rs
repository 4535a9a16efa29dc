//! Per-request operational logging.
//!
//! Grounded on the teacher's `telemetry::log::RequestLog` /
//! `DropOnLog` pattern (accumulate fields through the request's
//! lifetime, emit one structured `tracing` event when the holder is
//! dropped) trimmed of the CEL filter/field-injection machinery: this
//! core's request shape is fixed by §3/§4.7, so there's no per-deployment
//! field configuration to evaluate.

use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

/// A value set asynchronously after the holder of the `RequestLog`
/// reference has moved on — e.g. a response-size observation that only
/// becomes known once the response stream finishes.
#[derive(Debug)]
pub struct AsyncLog<T>(Mutex<Option<T>>);

impl<T> AsyncLog<T> {
	pub fn store(&self, v: T) {
		*self.0.lock().expect("not poisoned") = Some(v);
	}
}

impl<T: Clone> AsyncLog<T> {
	pub fn load(&self) -> Option<T> {
		self.0.lock().expect("not poisoned").clone()
	}
}

impl<T> Default for AsyncLog<T> {
	fn default() -> Self {
		AsyncLog(Mutex::new(None))
	}
}

/// Accumulates the fields of one downstream request as the handler
/// (C7) moves it through `{Init, Calling, Responded, Complete}`, and
/// emits a single structured log line when dropped — regardless of
/// which state the request ended in, so cancelled/rejected requests are
/// logged exactly like completed ones.
#[derive(Debug)]
pub struct RequestLog {
	pub start: Instant,
	pub operation_id: Option<String>,
	pub operation_name: Option<String>,
	pub method: Option<String>,
	pub path: Option<String>,
	pub api_key_state: Option<&'static str>,
	pub response_code: AsyncLog<u16>,
	pub error: AsyncLog<String>,
}

impl RequestLog {
	pub fn new() -> Self {
		RequestLog {
			start: Instant::now(),
			operation_id: None,
			operation_name: None,
			method: None,
			path: None,
			api_key_state: None,
			response_code: AsyncLog::default(),
			error: AsyncLog::default(),
		}
	}
}

impl Default for RequestLog {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for RequestLog {
	fn drop(&mut self) {
		let elapsed_ms = self.start.elapsed().as_millis();
		let status = self.response_code.load();
		let error = self.error.load();
		if status.is_some_and(|s| s >= 400) || error.is_some() {
			tracing::warn!(
				operation_id = self.operation_id.as_deref(),
				operation_name = self.operation_name.as_deref(),
				method = self.method.as_deref(),
				path = self.path.as_deref(),
				api_key_state = self.api_key_state,
				status,
				error = error.as_deref(),
				latency_ms = elapsed_ms,
				"request"
			);
		} else {
			info!(
				operation_id = self.operation_id.as_deref(),
				operation_name = self.operation_name.as_deref(),
				method = self.method.as_deref(),
				path = self.path.as_deref(),
				api_key_state = self.api_key_state,
				status,
				latency_ms = elapsed_ms,
				"request"
			);
		}
	}
}

/// Initializes the global `tracing` subscriber once at process start,
/// honoring `RUST_LOG` (§ ambient stack "Logging").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
	#[default]
	Compact,
	Json,
}

pub fn init_logging(format: Format) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let builder = tracing_subscriber::fmt().with_env_filter(filter);
	match format {
		Format::Json => {
			let _ = builder.json().try_init();
		},
		Format::Compact => {
			let _ = builder.compact().try_init();
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn async_log_round_trips() {
		let log: AsyncLog<u16> = AsyncLog::default();
		assert_eq!(log.load(), None);
		log.store(404);
		assert_eq!(log.load(), Some(404));
	}

	#[test]
	fn drop_does_not_panic_with_no_fields_set() {
		let log = RequestLog::new();
		drop(log);
	}
}
