//! Request handler (C7).
//!
//! Drives one downstream request through path matching, API-key
//! extraction, check + quota admission, and report emission. Grounded
//! on `original_source/src/envoy/http/service_control/filter.cc`'s
//! `Filter::decodeHeaders`/`onDestroy` state machine, reworked onto
//! `async`/`await` plus a `tokio_util::sync::CancellationToken` for the
//! cancel-on-drop semantics the original gets from its destructor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::control::aggregator::{CheckCache, QuotaAggregator, ReportBatcher};
use crate::converter::ErrorType;
use crate::error::{ErrorKind, GatewayError};
use crate::matcher::{PathMatcher, VariableBinding};
use crate::rewrite::CompiledRouteConfig;
use crate::telemetry::log::RequestLog;
use crate::telemetry::metrics::{Decision as StatDecision, Metrics};

pub mod ip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Init,
	Calling,
	Responded,
	Complete,
}

#[derive(Debug, Clone)]
pub enum ApiKeyLocation {
	Query(String),
	Header(String),
	Cookie(String),
}

#[derive(Debug, Clone, Default)]
pub struct OperationRequirement {
	pub operation_id: String,
	pub api_name: String,
	pub api_version: String,
	pub service_id: String,
	pub api_key_locations: Vec<ApiKeyLocation>,
	pub allow_without_api_key: bool,
	pub skip_service_control: bool,
	pub metric_costs: Vec<(String, i64)>,
}

impl OperationRequirement {
	/// The synthetic requirement attached when no route matches, so a
	/// report is still emitted and the request is forwarded untouched.
	pub fn unknown() -> Self {
		OperationRequirement {
			operation_id: "UNKNOWN_OPERATION".to_string(),
			..Default::default()
		}
		.with_skip()
	}

	fn with_skip(mut self) -> Self {
		self.skip_service_control = true;
		self
	}
}

/// A downstream request's relevant surface: method, full raw path
/// (including query), and lower-cased header names. The surrounding
/// proxy runtime owns the actual HTTP connection; this is the contract
/// boundary described in the scope note.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
	pub method: String,
	pub path: String,
	pub headers: HashMap<String, String>,
}

impl IncomingRequest {
	fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
	}

	fn query_param(&self, name: &str) -> Option<String> {
		let (_, query) = self.path.split_once('?')?;
		url_query_param(query, name)
	}

	fn cookie(&self, name: &str) -> Option<String> {
		let header = self.header("cookie")?;
		for part in header.split(';') {
			let part = part.trim();
			if let Some((k, v)) = part.split_once('=') {
				if k.trim() == name {
					return Some(v.trim().to_string());
				}
			}
		}
		None
	}
}

fn url_query_param(query: &str, name: &str) -> Option<String> {
	for pair in query.split('&') {
		if let Some((k, v)) = pair.split_once('=') {
			if k == name {
				return percent_encoding::percent_decode_str(v)
					.decode_utf8()
					.ok()
					.map(|c| c.into_owned());
			}
		}
	}
	None
}

/// Iterate `locations` in order, returning the first match — the order
/// itself (not any notion of priority) decides which location wins.
fn extract_api_key(req: &IncomingRequest, locations: &[ApiKeyLocation]) -> Option<String> {
	for loc in locations {
		let found = match loc {
			ApiKeyLocation::Query(name) => req.query_param(name),
			ApiKeyLocation::Header(name) => req.header(name).map(|s| s.to_string()),
			ApiKeyLocation::Cookie(name) => req.cookie(name),
		};
		if found.is_some() {
			return found;
		}
	}
	None
}

pub enum Decision {
	Forward {
		rewritten_path: String,
		extra_headers: Vec<(String, String)>,
	},
	Reject {
		status: u16,
		response_code_detail: String,
		message: String,
	},
}

pub struct HandlerDeps {
	pub matcher: Arc<PathMatcher>,
	pub route_configs: HashMap<String, CompiledRouteConfig>,
	pub requirements: HashMap<String, OperationRequirement>,
	pub snake_to_json: HashMap<String, String>,
	pub check_cache: Arc<CheckCache>,
	pub quota_aggregator: Arc<QuotaAggregator>,
	pub report_batcher: Arc<ReportBatcher>,
	pub metrics: Arc<Metrics>,
	pub service_name: String,
	pub service_config_id: String,
	pub network_fail_open: bool,
	pub client_ip_from_forwarded_header: bool,
	pub gcp_zone: Option<String>,
	pub gcp_platform: Option<String>,
}

/// Owns one request's lifecycle. Dropping it before [`Self::complete`]
/// cancels any in-flight check/quota call and suppresses their
/// callbacks, mirroring the original filter's `onDestroy`.
pub struct RequestHandler {
	deps: Arc<HandlerDeps>,
	state: State,
	cancel: CancellationToken,
	log: RequestLog,
}

impl RequestHandler {
	pub fn new(deps: Arc<HandlerDeps>) -> Self {
		RequestHandler {
			deps,
			state: State::Init,
			cancel: CancellationToken::new(),
			log: RequestLog::new(),
		}
	}

	pub fn state(&self) -> State {
		self.state
	}

	/// Runs the full admission pipeline for one request and returns the
	/// decision; does not itself emit the final report (callers invoke
	/// [`Self::report`] once the response/stream has completed, per the
	/// "check precedes quota precedes report" ordering guarantee).
	pub async fn on_headers(&mut self, mut req: IncomingRequest) -> (Decision, crate::report::ReportRequestInfo) {
		self.state = State::Init;

		if let Some(over) = req.header("x-http-method-override") {
			req.method = over.to_string();
		}
		self.log.method = Some(req.method.clone());
		self.log.path = Some(req.path.clone());

		if req.method.is_empty() {
			return self.reject_without_report(400, "MISSING_METHOD", "missing :method");
		}
		if req.path.is_empty() {
			return self.reject_without_report(400, "MISSING_PATH", "missing :path");
		}

		let (matched_operation_id, bindings, requirement) = match self.deps.matcher.lookup(&req.method, &req.path) {
			Some(m) => {
				self.deps.metrics.record_match(crate::telemetry::metrics::MatchOutcome::Allowed);
				let requirement = self
					.deps
					.requirements
					.get(&m.method_data.operation_id)
					.cloned()
					.unwrap_or_else(|| {
						warn!(operation_id = %m.method_data.operation_id, "matched route has no configured requirement");
						OperationRequirement::unknown()
					});
				(m.method_data.operation_id.clone(), m.bindings, requirement)
			},
			None => {
				self.deps.metrics.record_match(crate::telemetry::metrics::MatchOutcome::Denied);
				(String::new(), Vec::new(), OperationRequirement::unknown())
			},
		};

		self.log.operation_id = Some(requirement.operation_id.clone());
		self.log.operation_name = Some(matched_operation_id.clone());

		let (path_no_query, query) = match req.path.split_once('?') {
			Some((p, q)) => (p, Some(q)),
			None => (req.path.as_str(), None),
		};

		let mut extra_headers = Vec::new();
		let mut rewritten_path = req.path.clone();
		if let Some(route) = self.deps.route_configs.get(&requirement.operation_id) {
			match route.rewrite(path_no_query, query, &bindings, &self.deps.snake_to_json) {
				Ok(r) => {
					if r.path == path_no_query {
						self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::PathNotChanged);
					} else {
						self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::PathChanged);
						extra_headers.push(("x-envoy-original-path".to_string(), req.path.clone()));
					}
					rewritten_path = match &r.query {
						Some(q) if !q.is_empty() => format!("{}?{}", r.path, q),
						_ => r.path,
					};
				},
				Err(crate::rewrite::Error::InvalidPath) => {
					self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::DeniedByBadRequest);
					return self.reject_without_report(400, "path_rewrite_bad_request", "invalid path in route config");
				},
				Err(crate::rewrite::Error::UrlTemplateMismatch) => {
					self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::DeniedByWrongRouteConfig);
					return self.reject_without_report(400, "path_rewrite_wrong_route_config", "request path did not match route's url_template");
				},
			}
		} else if matched_operation_id.is_empty() {
			self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::DeniedByUndefinedRequest);
		} else {
			self.deps.metrics.record_rewrite(crate::telemetry::metrics::RewriteOutcome::PathNotChanged);
		}

		if requirement.skip_service_control {
			self.state = State::Complete;
			let info = self.base_report_info(&req, &requirement, &matched_operation_id, 200, "", now_placeholder());
			return (Decision::Forward { rewritten_path, extra_headers }, info);
		}

		self.state = State::Calling;

		let api_key = extract_api_key(&req, &requirement.api_key_locations);
		self.log.api_key_state = Some(if api_key.is_some() { "present" } else { "absent" });

		if api_key.is_none() && !requirement.allow_without_api_key {
			self.deps.metrics.record_decision(StatDecision::DeniedConsumerError);
			let mut info = self.base_report_info(&req, &requirement, &matched_operation_id, 401, "service_control_bad_request{MISSING_API_KEY}", now_placeholder());
			info.check_response_info.error = Some(crate::report::ScResponseError {
				name: "MISSING_API_KEY".to_string(),
				is_network_error: false,
				error_type: ErrorType::ConsumerError,
			});
			self.state = State::Responded;
			return (
				Decision::Reject {
					status: 401,
					response_code_detail: "service_control_bad_request{MISSING_API_KEY}".to_string(),
					message: "missing API key".to_string(),
				},
				info,
			);
		}

		let consumer_id = api_key.clone().unwrap_or_default();

		let mut check_info = crate::report::CheckResponseInfo::default();
		if api_key.is_some() || !requirement.allow_without_api_key {
			let check_req = crate::pb::CheckRequest {
				service_name: self.deps.service_name.clone(),
				service_config_id: self.deps.service_config_id.clone(),
				operation: Some(crate::pb::Operation {
					operation_id: uuid::Uuid::new_v4().to_string(),
					operation_name: matched_operation_id.clone(),
					consumer_id: format!("api_key:{consumer_id}"),
					labels: consumer_restriction_labels(&req),
					..Default::default()
				}),
			};
			let cache_key = format!("{}:{}", matched_operation_id, consumer_id);

			let check_result = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => {
					self.state = State::Init;
					let info = self.base_report_info(&req, &requirement, &matched_operation_id, 499, "", now_placeholder());
					return (Decision::Reject { status: 499, response_code_detail: String::new(), message: "cancelled".to_string() }, info);
				}
				r = self.deps.check_cache.get_or_check(cache_key, check_req) => r,
			};

			match check_result {
				Ok(resp) => {
					if let Some(err) = resp.check_errors.first() {
						let gw = crate::converter::check_error_to_gateway_error(&err.code, &err.detail, &self.deps.service_name);
						self.deps.metrics.record_decision(decision_for_error_type(&gw.response_code_detail));
						check_info.api_key_state = crate::report::ApiKeyState::Invalid;
						check_info.error = Some(crate::report::ScResponseError {
							name: err.code.clone(),
							is_network_error: false,
							error_type: crate::converter::convert_check_error(&err.code, &err.detail, &self.deps.service_name).1,
						});
						self.state = State::Responded;
						let info = self.finish_report_info(&req, &requirement, &matched_operation_id, gw.http_status(), &gw.response_code_detail, check_info);
						return (
							Decision::Reject {
								status: gw.http_status(),
								response_code_detail: gw.response_code_detail.clone(),
								message: gw.message.clone(),
							},
							info,
						);
					}
					check_info.api_key_state = crate::report::ApiKeyState::Verified;
					check_info.consumer_project_number = resp.consumer_project_number.clone();
					extra_headers.push(("x-endpoint-api-project-id".to_string(), resp.consumer_project_number.clone()));
				},
				Err(e) => {
					if self.deps.network_fail_open {
						self.deps.metrics.record_decision(StatDecision::AllowedControlPlaneFault);
						check_info.api_key_state = crate::report::ApiKeyState::NotChecked;
					} else {
						self.deps.metrics.record_decision(StatDecision::DeniedControlPlaneFault);
						self.state = State::Responded;
						let info = self.finish_report_info(&req, &requirement, &matched_operation_id, 503, "service_control_check_error{Unspecified}", check_info);
						warn!(error = %e, "check call failed and fail-open is disabled");
						return (
							Decision::Reject {
								status: 503,
								response_code_detail: "service_control_check_error{Unspecified}".to_string(),
								message: "service control unavailable".to_string(),
							},
							info,
						);
					}
				},
			}
		}

		if !requirement.metric_costs.is_empty() {
			let metrics: HashMap<String, i64> = requirement.metric_costs.iter().cloned().collect();
			let allocate_result = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => {
					self.state = State::Init;
					let info = self.finish_report_info(&req, &requirement, &matched_operation_id, 499, "", check_info);
					return (Decision::Reject { status: 499, response_code_detail: String::new(), message: "cancelled".to_string() }, info);
				}
				r = self.deps.quota_aggregator.allocate(&matched_operation_id, &consumer_id, &matched_operation_id, &metrics, self.deps.network_fail_open) => r,
			};
			if let Err(gw) = allocate_result {
				self
					.deps
					.metrics
					.record_decision(decision_for_error_type(&gw.response_code_detail));
				self.state = State::Responded;
				let info = self.finish_report_info(&req, &requirement, &matched_operation_id, gw.http_status(), &gw.response_code_detail, check_info);
				return (
					Decision::Reject {
						status: gw.http_status(),
						response_code_detail: gw.response_code_detail.clone(),
						message: gw.message.clone(),
					},
					info,
				);
			}
		}

		self.state = State::Complete;
		self.deps.metrics.record_decision(StatDecision::Allowed);
		let info = self.finish_report_info(&req, &requirement, &matched_operation_id, 200, "", check_info);
		(Decision::Forward { rewritten_path, extra_headers }, info)
	}

	/// Enqueues the final report for this request. Called by the
	/// surrounding runtime once the response/stream has completed (and
	/// therefore `response_code`/sizes/latency are known) — building the
	/// report itself is C8's job; this just hands it to C6.
	pub async fn report(&mut self, mut info: crate::report::ReportRequestInfo, now_millis: i64) {
		info.service_config_id = self.deps.service_config_id.clone();
		match crate::report::build_report(&info, now_millis) {
			Ok(ops) => {
				for op in ops {
					self.deps.report_batcher.enqueue(op).await;
				}
			},
			Err(e) => warn!(error = %e, "dropping malformed report"),
		}
		self.log.response_code.store(info.response_code);
		self.state = State::Complete;
	}

	fn reject_without_report(&mut self, status: u16, detail: &str, message: &str) -> (Decision, crate::report::ReportRequestInfo) {
		self.state = State::Responded;
		self.log.response_code.store(status);
		(
			Decision::Reject {
				status,
				response_code_detail: format!("service_control_bad_request{{{detail}}}"),
				message: message.to_string(),
			},
			crate::report::ReportRequestInfo {
				response_code: status,
				response_code_detail: detail.to_string(),
				..Default::default()
			},
		)
	}

	fn base_report_info(
		&self,
		req: &IncomingRequest,
		requirement: &OperationRequirement,
		operation_name: &str,
		response_code: u16,
		response_code_detail: &str,
		now_millis: i64,
	) -> crate::report::ReportRequestInfo {
		let _ = now_millis;
		crate::report::ReportRequestInfo {
			operation_id: requirement.operation_id.clone(),
			operation_name: operation_name.to_string(),
			method: req.method.clone(),
			url: req.path.clone(),
			response_code,
			response_code_detail: response_code_detail.to_string(),
			remote_ip: ip::extract(&req.headers, self.deps.client_ip_from_forwarded_header),
			referer: req.header("referer").map(|s| s.to_string()),
			log_names: vec!["endpoints_log".to_string()],
			service_config_id: self.deps.service_config_id.clone(),
			producer_project_id: self.deps.service_id_placeholder(),
			location: self.deps.gcp_zone.clone(),
			compute_platform: self.deps.gcp_platform.clone(),
			..Default::default()
		}
	}

	fn finish_report_info(
		&self,
		req: &IncomingRequest,
		requirement: &OperationRequirement,
		operation_name: &str,
		response_code: u16,
		response_code_detail: &str,
		check_response_info: crate::report::CheckResponseInfo,
	) -> crate::report::ReportRequestInfo {
		let mut info = self.base_report_info(req, requirement, operation_name, response_code, response_code_detail, 0);
		info.check_response_info = check_response_info;
		info
	}
}

impl HandlerDeps {
	fn service_id_placeholder(&self) -> String {
		self.service_name.clone()
	}
}

fn decision_for_error_type(response_code_detail: &str) -> StatDecision {
	if response_code_detail.contains("ConsumerQuota") {
		StatDecision::DeniedConsumerQuota
	} else if response_code_detail.contains("ConsumerBlocked") {
		StatDecision::DeniedConsumerBlocked
	} else if response_code_detail.contains("ApiKeyInvalid") || response_code_detail.contains("ServiceNotActivated") || response_code_detail.contains("ConsumerError") {
		StatDecision::DeniedConsumerError
	} else {
		StatDecision::DeniedProducerError
	}
}

/// Placeholder until the caller threads in a real wall-clock timestamp;
/// this module never reads the clock itself (keeps it deterministically
/// testable), mirroring `report::build_report`'s `now_millis` parameter.
fn now_placeholder() -> i64 {
	0
}

impl Drop for RequestHandler {
	fn drop(&mut self) {
		if self.state == State::Calling {
			self.cancel.cancel();
		}
	}
}
