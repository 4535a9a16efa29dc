//! The one error taxonomy used everywhere a per-request error crosses a
//! boundary (§7 "Error handling design", §9's note consolidating the old
//! C++ code's two redundant converter classes into one table).
//!
//! Grounded on the teacher's per-module `thiserror` convention (e.g.
//! `control::caclient::Error`) and on `original_source/src/envoy/http/
//! service_control/filter.cc`'s error-to-HTTP mapping.

use thiserror::Error;

/// The kinds enumerated in §7. Each maps deterministically to an HTTP
/// status and a response-code-detail tag suitable for log sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	BadRequest,
	Unauthenticated,
	PermissionDenied,
	ResourceExhausted,
	NotFound,
	Internal,
	Unavailable,
	Cancelled,
}

impl ErrorKind {
	pub fn http_status(self) -> u16 {
		match self {
			ErrorKind::BadRequest => 400,
			ErrorKind::Unauthenticated => 401,
			ErrorKind::PermissionDenied => 403,
			ErrorKind::NotFound => 404,
			ErrorKind::ResourceExhausted => 429,
			ErrorKind::Internal => 500,
			ErrorKind::Unavailable => 503,
			ErrorKind::Cancelled => 499,
		}
	}
}

/// A per-request error with its kind, an HTTP-reason-phrase-style
/// message suitable to return to the client, and a response-code-detail
/// tag used for tracing/log sampling (§6: `service_control_check_error{…}`,
/// `service_control_bad_request{…}`, etc).
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
	pub kind: ErrorKind,
	pub message: String,
	pub response_code_detail: String,
}

impl GatewayError {
	pub fn new(kind: ErrorKind, message: impl Into<String>, response_code_detail: impl Into<String>) -> Self {
		GatewayError {
			kind,
			message: message.into(),
			response_code_detail: response_code_detail.into(),
		}
	}

	pub fn bad_request(reason: &str) -> Self {
		Self::new(
			ErrorKind::BadRequest,
			reason,
			format!("service_control_bad_request{{{reason}}}"),
		)
	}

	pub fn http_status(&self) -> u16 {
		self.kind.http_status()
	}
}
