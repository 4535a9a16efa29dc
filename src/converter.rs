//! Response converter (C9).
//!
//! Maps Service-Control error codes to `(status, error type, response
//! code detail)` per §4.9's table. Grounded on
//! `original_source/src/envoy/http/service_control/handler_utils.cc`'s
//! `ScResponseErrorType`/`getStatus` helpers — the old code redundantly
//! defined two converter classes (check, quota) with the same table;
//! per §9's consolidation note, this module is the single source of
//! truth for both the HTTP response code and the stats bucket, used by
//! both RPCs.

use crate::error::{ErrorKind, GatewayError};

/// `ScResponseError.type` (§3 `CheckResponseInfo`). Also serves as the
/// stats-bucket tag (`denied_consumer_{blocked,error,quota}`, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
	Unspecified,
	ApiKeyInvalid,
	ServiceNotActivated,
	ConsumerBlocked,
	ConsumerError,
	ConsumerQuota,
}

impl ErrorType {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorType::Unspecified => "Unspecified",
			ErrorType::ApiKeyInvalid => "ApiKeyInvalid",
			ErrorType::ServiceNotActivated => "ServiceNotActivated",
			ErrorType::ConsumerBlocked => "ConsumerBlocked",
			ErrorType::ConsumerError => "ConsumerError",
			ErrorType::ConsumerQuota => "ConsumerQuota",
		}
	}
}

/// Convert one `:check` error (`CheckError.code`/`detail` in our wire
/// format) into `(kind, error_type, message)`. `service_name` is
/// interpolated into the `SERVICE_NOT_ACTIVATED` message per the table.
pub fn convert_check_error(code: &str, detail: &str, service_name: &str) -> (ErrorKind, ErrorType, String) {
	match code {
		"NOT_FOUND" | "PROJECT_INVALID" => (
			ErrorKind::BadRequest,
			ErrorType::ConsumerError,
			default_message(code, detail),
		),
		"RESOURCE_EXHAUSTED" => (
			ErrorKind::ResourceExhausted,
			ErrorType::ConsumerQuota,
			default_message(code, detail),
		),
		"API_KEY_NOT_FOUND" | "API_KEY_EXPIRED" | "API_KEY_INVALID" => (
			ErrorKind::BadRequest,
			ErrorType::ApiKeyInvalid,
			default_message(code, detail),
		),
		"SERVICE_NOT_ACTIVATED" => (
			ErrorKind::PermissionDenied,
			ErrorType::ServiceNotActivated,
			format!("{service_name} has not been used before or it is disabled"),
		),
		"IP_ADDRESS_BLOCKED" | "REFERER_BLOCKED" | "CLIENT_APP_BLOCKED" | "API_TARGET_BLOCKED" => (
			ErrorKind::PermissionDenied,
			ErrorType::ConsumerBlocked,
			default_message(code, detail),
		),
		"PERMISSION_DENIED" | "PROJECT_DELETED" | "BILLING_DISABLED" | "INVALID_CREDENTIAL"
		| "CONSUMER_INVALID" => (
			ErrorKind::PermissionDenied,
			ErrorType::ConsumerError,
			default_message(code, detail),
		),
		"NAMESPACE_LOOKUP_UNAVAILABLE"
		| "SERVICE_STATUS_UNAVAILABLE"
		| "BILLING_STATUS_UNAVAILABLE"
		| "CLOUD_RESOURCE_MANAGER_BACKEND_UNAVAILABLE" => (
			ErrorKind::Unavailable,
			ErrorType::Unspecified,
			default_message(code, detail),
		),
		_ => (ErrorKind::Internal, ErrorType::Unspecified, default_message(code, detail)),
	}
}

/// `:allocateQuota` errors are a shorter table with analogous structure
/// (§4.9): resource exhaustion maps the same way, and everything else
/// collapses onto the equivalent consumer-error/unavailable/internal
/// buckets rather than repeating the full check table.
pub fn convert_quota_error(code: &str, description: &str) -> (ErrorKind, ErrorType, String) {
	match code {
		"RESOURCE_EXHAUSTED" | "OUT_OF_RANGE" => (
			ErrorKind::ResourceExhausted,
			ErrorType::ConsumerQuota,
			default_message(code, description),
		),
		"PROJECT_INVALID" | "PROJECT_DELETED" | "BILLING_DISABLED" | "CONSUMER_INVALID" => (
			ErrorKind::PermissionDenied,
			ErrorType::ConsumerError,
			default_message(code, description),
		),
		"NAMESPACE_LOOKUP_UNAVAILABLE" | "SERVICE_STATUS_UNAVAILABLE" | "BILLING_STATUS_UNAVAILABLE" => (
			ErrorKind::Unavailable,
			ErrorType::Unspecified,
			default_message(code, description),
		),
		_ => (
			ErrorKind::Internal,
			ErrorType::Unspecified,
			default_message(code, description),
		),
	}
}

fn default_message(code: &str, detail: &str) -> String {
	if detail.is_empty() {
		code.to_string()
	} else {
		format!("{code}: {detail}")
	}
}

pub fn check_error_response_code_detail(error_type: ErrorType) -> String {
	format!("service_control_check_error{{{}}}", error_type.as_str())
}

pub fn quota_error_response_code_detail(error_type: ErrorType) -> String {
	format!("service_control_quota_error{{{}}}", error_type.as_str())
}

pub fn check_error_to_gateway_error(code: &str, detail: &str, service_name: &str) -> GatewayError {
	let (kind, error_type, message) = convert_check_error(code, detail, service_name);
	GatewayError::new(kind, message, check_error_response_code_detail(error_type))
}

pub fn quota_error_to_gateway_error(code: &str, description: &str) -> GatewayError {
	let (kind, error_type, message) = convert_quota_error(code, description);
	GatewayError::new(kind, message, quota_error_response_code_detail(error_type))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn service_not_activated_includes_service_name() {
		let e = check_error_to_gateway_error("SERVICE_NOT_ACTIVATED", "", "my-service.googleapis.com");
		assert_eq!(e.kind, ErrorKind::PermissionDenied);
		assert!(e.message.contains("my-service.googleapis.com"));
		assert_eq!(e.response_code_detail, "service_control_check_error{ServiceNotActivated}");
	}

	#[test]
	fn resource_exhausted_maps_to_429() {
		let e = check_error_to_gateway_error("RESOURCE_EXHAUSTED", "quota", "svc");
		assert_eq!(e.http_status(), 429);
	}

	#[test]
	fn quota_resource_exhausted_carries_description() {
		let e = quota_error_to_gateway_error("RESOURCE_EXHAUSTED", "queries per day");
		assert_eq!(e.http_status(), 429);
		assert!(e.message.contains("queries per day"));
	}

	#[test]
	fn unknown_code_is_internal() {
		let e = check_error_to_gateway_error("SOMETHING_NEW", "x", "svc");
		assert_eq!(e.kind, ErrorKind::Internal);
	}
}
