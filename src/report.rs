//! Report builder (C8).
//!
//! Turns one request's observations into the `Operation` message(s) sent
//! to `:report`: a fixed metric menu, a fixed label menu, and one log
//! entry per configured log name. Grounded on
//! `original_source/src/envoy/http/service_control/request_builder.cc`'s
//! `ReportRequestBuilder` (metric/label tables, by-consumer op, JWT
//! payload excerpting) and the teacher's `telemetry::metrics` histogram
//! registration style for the `Distribution` shape.

use std::collections::HashMap;

use crate::converter::ErrorType;
use crate::error::{ErrorKind, GatewayError};
use crate::pb::{Distribution, ExponentialBuckets, LogEntry, MetricValue, MetricValueSet, Operation, log_entry::Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiKeyState {
	#[default]
	NotChecked,
	Invalid,
	NotEnabled,
	Verified,
}

#[derive(Debug, Clone)]
pub struct ScResponseError {
	pub name: String,
	pub is_network_error: bool,
	pub error_type: ErrorType,
}

#[derive(Debug, Clone, Default)]
pub struct CheckResponseInfo {
	pub consumer_project_number: String,
	pub consumer_type: String,
	pub consumer_number: String,
	pub api_key_state: ApiKeyState,
	pub error: Option<ScResponseError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendProtocol {
	#[default]
	Unknown,
	Http,
	Https,
	Grpc,
}

#[derive(Debug, Clone, Default)]
pub struct Latency {
	pub request_ms: f64,
	pub backend_ms: f64,
	pub overhead_ms: f64,
}

/// Excerpted from the upstream JWT-auth filter's request-scoped
/// attributes — this core never verifies the JWT itself.
#[derive(Debug, Clone, Default)]
pub struct JwtPayload {
	pub issuer: Option<String>,
	pub audience: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportRequestInfo {
	pub operation_id: String,
	pub operation_name: String,
	pub api_key: Option<String>,
	pub consumer_project_id: Option<String>,
	pub producer_project_id: String,
	pub response_code: u16,
	pub response_code_detail: String,
	pub url: String,
	pub method: String,
	pub request_size: i64,
	pub response_size: i64,
	pub latency: Latency,
	pub frontend_protocol: String,
	pub backend_protocol: BackendProtocol,
	pub check_response_info: CheckResponseInfo,
	pub location: Option<String>,
	pub compute_platform: Option<String>,
	pub jwt_payload: Option<JwtPayload>,
	pub log_request_headers: HashMap<String, String>,
	pub log_response_headers: HashMap<String, String>,
	pub remote_ip: Option<String>,
	pub referer: Option<String>,
	pub log_names: Vec<String>,
	pub service_agent_version: String,
	pub service_config_id: String,
}

const TIME_BUCKETS: u32 = 29;
const TIME_GROWTH: f64 = 2.0;
const TIME_SCALE: f64 = 1e-6;
const SIZE_BUCKETS: u32 = 8;
const SIZE_GROWTH: f64 = 10.0;
const SIZE_SCALE: f64 = 1.0;

fn single_observation_distribution(value: f64, num_buckets: u32, growth: f64, scale: f64) -> Distribution {
	let mut bucket_counts = vec![0i64; num_buckets as usize + 2];
	let mut idx = 0usize;
	let mut bound = scale;
	while idx < num_buckets as usize && value >= bound {
		bound *= growth;
		idx += 1;
	}
	bucket_counts[idx] = 1;
	Distribution {
		count: 1,
		mean: value,
		minimum: value,
		maximum: value,
		sum_of_squared_deviation: 0.0,
		bucket_counts,
		exponential_buckets: Some(ExponentialBuckets {
			num_finite_buckets: num_buckets as i32,
			growth_factor: growth,
			scale,
		}),
	}
}

fn time_distribution(ms: f64) -> Distribution {
	single_observation_distribution(ms / 1000.0, TIME_BUCKETS, TIME_GROWTH, TIME_SCALE)
}

fn size_distribution(bytes: i64) -> Distribution {
	single_observation_distribution(bytes as f64, SIZE_BUCKETS, SIZE_GROWTH, SIZE_SCALE)
}

fn metric(name: &str, value: MetricValue) -> MetricValueSet {
	MetricValueSet {
		metric_name: name.to_string(),
		metric_values: vec![value],
	}
}

fn int_metric(name: &str, v: i64) -> MetricValueSet {
	metric(
		name,
		MetricValue {
			value: Some(crate::pb::metric_value::Value::Int64Value(v)),
			..Default::default()
		},
	)
}

fn dist_metric(name: &str, d: Distribution) -> MetricValueSet {
	metric(
		name,
		MetricValue {
			value: Some(crate::pb::metric_value::Value::DistributionValue(d)),
			..Default::default()
		},
	)
}

/// `/credential_id`: `apikey:<key>` when the key was verified, else a
/// JWT-derived value when JWT info is present, else absent entirely.
fn credential_id(info: &ReportRequestInfo) -> Option<String> {
	if info.check_response_info.api_key_state == ApiKeyState::Verified {
		if let Some(key) = &info.api_key {
			return Some(format!("apikey:{key}"));
		}
	}
	let jwt = info.jwt_payload.as_ref()?;
	let issuer = jwt.issuer.as_ref()?;
	let mut s = format!("jwtauth:issuer={}", base64_url(issuer));
	if let Some(aud) = &jwt.audience {
		s.push_str(&format!("&audience={}", base64_url(aud)));
	}
	Some(s)
}

fn base64_url(s: &str) -> String {
	use base64::Engine;
	base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
}

fn response_code_class(code: u16) -> &'static str {
	match code / 100 {
		1 => "1xx",
		2 => "2xx",
		3 => "3xx",
		4 => "4xx",
		5 => "5xx",
		_ => "0xx",
	}
}

fn build_labels(info: &ReportRequestInfo) -> HashMap<String, String> {
	let mut labels = HashMap::new();
	labels.insert(
		"cloud.googleapis.com/location".to_string(),
		info.location.clone().unwrap_or_else(|| "global".to_string()),
	);
	labels.insert("/response_code_class".to_string(), response_code_class(info.response_code).to_string());
	labels.insert("/status_code".to_string(), info.response_code.to_string());
	labels.insert("/protocol".to_string(), info.frontend_protocol.clone());
	if let Some(platform) = &info.compute_platform {
		labels.insert("servicecontrol.googleapis.com/platform".to_string(), platform.clone());
	}
	if let Some(cred) = credential_id(info) {
		labels.insert("/credential_id".to_string(), cred);
	}
	labels
}

fn build_log_entry(info: &ReportRequestInfo, name: &str, now_millis: i64) -> LogEntry {
	let severity = if info.response_code >= 400 {
		Severity::Error
	} else {
		Severity::Info
	};
	let mut payload = HashMap::new();
	payload.insert("timestamp_seconds".to_string(), format!("{:.3}", now_millis as f64 / 1000.0));
	payload.insert("service_agent".to_string(), info.service_agent_version.clone());
	payload.insert("api_key_state".to_string(), format!("{:?}", info.check_response_info.api_key_state));
	payload.insert("service_config_id".to_string(), info.service_config_id.clone());
	payload.insert("http_status".to_string(), info.response_code.to_string());
	payload.insert("http_method".to_string(), info.method.clone());
	payload.insert("http_url".to_string(), info.url.clone());
	payload.insert("request_size".to_string(), info.request_size.to_string());
	payload.insert("response_size".to_string(), info.response_size.to_string());
	payload.insert("latency_ms".to_string(), info.latency.request_ms.to_string());
	if let Some(ip) = &info.remote_ip {
		payload.insert("remote_ip".to_string(), ip.clone());
	}
	if let Some(referer) = &info.referer {
		payload.insert("referer".to_string(), referer.clone());
	}
	if !info.response_code_detail.is_empty() {
		payload.insert("response_code_detail".to_string(), info.response_code_detail.clone());
	}
	LogEntry {
		name: name.to_string(),
		timestamp_millis: now_millis,
		severity: severity as i32,
		struct_payload: payload,
	}
}

/// Builds the report `Operation`s for one request: the primary operation,
/// plus a by-consumer operation (`operation_id = original_id + "1"`) when
/// the API key was verified — preserved verbatim from the original's
/// undocumented suffix convention. `now_millis` is the caller-supplied
/// wall-clock timestamp (this module never reads the clock itself).
pub fn build_report(info: &ReportRequestInfo, now_millis: i64) -> Result<Vec<Operation>, GatewayError> {
	if info.operation_id.is_empty() || info.operation_name.is_empty() {
		return Err(GatewayError::new(
			ErrorKind::BadRequest,
			"operation_id and operation_name must be non-empty",
			"service_control_bad_request{INVALID_REPORT_OPERATION}",
		));
	}

	let labels = build_labels(info);
	let log_entries: Vec<LogEntry> = info
		.log_names
		.iter()
		.map(|name| build_log_entry(info, name, now_millis))
		.collect();

	let mut producer_metrics = vec![
		int_metric("serviceruntime.googleapis.com/api/producer/request_count", 1),
		dist_metric(
			"serviceruntime.googleapis.com/api/producer/request_sizes",
			size_distribution(info.request_size),
		),
		dist_metric(
			"serviceruntime.googleapis.com/api/producer/response_sizes",
			size_distribution(info.response_size),
		),
		dist_metric(
			"serviceruntime.googleapis.com/api/producer/total_latencies",
			time_distribution(info.latency.request_ms),
		),
		dist_metric(
			"serviceruntime.googleapis.com/api/producer/backend_latencies",
			time_distribution(info.latency.backend_ms),
		),
		dist_metric(
			"serviceruntime.googleapis.com/api/producer/request_overhead_latencies",
			time_distribution(info.latency.overhead_ms),
		),
	];

	let verified = info.check_response_info.api_key_state == ApiKeyState::Verified;
	if verified {
		producer_metrics.extend([
			int_metric("serviceruntime.googleapis.com/api/consumer/request_count", 1),
			dist_metric(
				"serviceruntime.googleapis.com/api/consumer/request_sizes",
				size_distribution(info.request_size),
			),
			dist_metric(
				"serviceruntime.googleapis.com/api/consumer/response_sizes",
				size_distribution(info.response_size),
			),
			dist_metric(
				"serviceruntime.googleapis.com/api/consumer/total_latencies",
				time_distribution(info.latency.request_ms),
			),
		]);
	}

	let primary = Operation {
		operation_id: info.operation_id.clone(),
		operation_name: info.operation_name.clone(),
		consumer_id: info.consumer_project_id.clone().unwrap_or_default(),
		start_time_millis: now_millis - info.latency.request_ms as i64,
		end_time_millis: now_millis,
		metric_value_sets: producer_metrics,
		log_entries,
		labels,
	};

	let mut ops = vec![primary];

	if verified {
		let by_consumer = Operation {
			operation_id: format!("{}1", info.operation_id),
			operation_name: info.operation_name.clone(),
			consumer_id: info.consumer_project_id.clone().unwrap_or_default(),
			start_time_millis: now_millis - info.latency.request_ms as i64,
			end_time_millis: now_millis,
			metric_value_sets: vec![int_metric("serviceruntime.googleapis.com/api/producer/by_consumer/request_count", 1)],
			log_entries: vec![],
			labels: build_labels(info),
		};
		ops.push(by_consumer);
	}

	Ok(ops)
}
