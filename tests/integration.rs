//! End-to-end exercise of the request-processing core against a
//! wiremock-mocked Service-Control backend: config compiles into a live
//! `Gateway`, and a `RequestHandler` drives each scenario through the
//! full match → rewrite → check → quota pipeline. Mirrors the shape of
//! the spec's concrete scenarios (simple match/binding, custom verb +
//! wildcard, rewrite, missing API key, quota exhaustion, fail-open on a
//! 5xx check response).

use std::collections::HashMap;

use prost::Message;
use svc_control_gateway::app::Gateway;
use svc_control_gateway::handler::{Decision, IncomingRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_yaml(sc_uri: &str, network_fail_open: bool) -> String {
	format!(
		r#"
service_name: library.googleapis.com
service_config_id: 2026-07-29r0
service_control_uri: {sc_uri}
sc_calling_config:
  network_fail_open: {network_fail_open}
requirements:
  - operation_id: 1.books.get
    operation_name: Library.GetBook
    http_method: GET
    http_template: /v1/shelves/{{shelf}}/books/{{book}}
    api_key:
      allow_without_api_key: false
      locations:
        - in: header
          name: x-api-key
  - operation_id: 1.books.custom
    operation_name: Library.CustomAction
    http_method: POST
    http_template: /v1/shelves/{{shelf}}/books/**:mutate
    api_key:
      allow_without_api_key: true
    metric_costs:
      - [queries, 1]
  - operation_id: 1.books.rewritten
    operation_name: Library.LegacyGet
    http_method: GET
    http_template: /legacy/books/{{book}}
    api_key:
      allow_without_api_key: true
    route:
      kind: constant_path
      path: /internal/v2/books
token:
  access_token:
    type: imds
    url: {sc_uri}/token
"#
	)
}

async fn mount_check_ok(server: &MockServer) {
	let resp = svc_control_gateway::pb::CheckResponse {
		operation_id: "check-op-1".to_string(),
		..Default::default()
	};
	Mock::given(method("POST"))
		.and(path("/v1/services/library.googleapis.com:check"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(resp.encode_to_vec()))
		.mount(server)
		.await;
}

async fn mount_token(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"access_token": "test-access-token",
			"expires_in": 3600,
		})))
		.mount(server)
		.await;
}

async fn mount_quota(server: &MockServer, allocate_errors: Vec<svc_control_gateway::pb::QuotaError>) {
	let resp = svc_control_gateway::pb::AllocateQuotaResponse {
		allocate_errors,
		..Default::default()
	};
	Mock::given(method("POST"))
		.and(path("/v1/services/library.googleapis.com:allocateQuota"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(resp.encode_to_vec()))
		.mount(server)
		.await;
}

async fn mount_report(server: &MockServer) {
	let resp = svc_control_gateway::pb::ReportResponse::default();
	Mock::given(method("POST"))
		.and(path("/v1/services/library.googleapis.com:report"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(resp.encode_to_vec()))
		.mount(server)
		.await;
}

#[tokio::test]
async fn simple_get_matches_and_binds_with_valid_api_key() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	mount_check_ok(&server).await;
	mount_report(&server).await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let mut headers = HashMap::new();
	headers.insert("x-api-key".to_string(), "k1".to_string());
	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/v1/shelves/s1/books/b1".to_string(),
			headers,
		})
		.await;

	match decision {
		Decision::Forward { rewritten_path, .. } => assert_eq!(rewritten_path, "/v1/shelves/s1/books/b1"),
		Decision::Reject { status, message, .. } => panic!("expected forward, got {status} {message}"),
	}
	assert_eq!(info.operation_id, "1.books.get");
	handler.report(info, 1_000_000).await;
}

#[tokio::test]
async fn custom_verb_with_double_wildcard_allocates_quota() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	mount_quota(&server, vec![]).await;
	mount_report(&server).await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "POST".to_string(),
			path: "/v1/shelves/s1/books/b1/chapters/c1:mutate".to_string(),
			headers: HashMap::new(),
		})
		.await;

	match decision {
		Decision::Forward { .. } => {},
		Decision::Reject { status, message, .. } => panic!("expected forward, got {status} {message}"),
	}
	assert_eq!(info.operation_id, "1.books.custom");
}

#[tokio::test]
async fn constant_path_route_rewrites_backend_path() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	mount_report(&server).await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/legacy/books/b1".to_string(),
			headers: HashMap::new(),
		})
		.await;

	match decision {
		Decision::Forward { rewritten_path, .. } => {
			assert!(rewritten_path.starts_with("/internal/v2/books"));
			assert!(rewritten_path.contains("book=b1"));
		},
		Decision::Reject { status, message, .. } => panic!("expected forward, got {status} {message}"),
	}
	assert_eq!(info.operation_id, "1.books.rewritten");
}

#[tokio::test]
async fn missing_required_api_key_is_rejected_without_calling_check() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	// No check mock mounted: the handler must reject before ever touching
	// the network once it sees a required, absent API key.

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/v1/shelves/s1/books/b1".to_string(),
			headers: HashMap::new(),
		})
		.await;

	match decision {
		Decision::Reject { status, .. } => assert_eq!(status, 401),
		Decision::Forward { .. } => panic!("expected rejection for missing API key"),
	}
	assert_eq!(info.response_code, 401);
}

#[tokio::test]
async fn quota_exhaustion_rejects_with_429() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	mount_quota(
		&server,
		vec![svc_control_gateway::pb::QuotaError {
			code: "RESOURCE_EXHAUSTED".to_string(),
			subject: String::new(),
			description: "queries per day".to_string(),
		}],
	)
	.await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "POST".to_string(),
			path: "/v1/shelves/s1/books/b1:mutate".to_string(),
			headers: HashMap::new(),
		})
		.await;

	match decision {
		Decision::Reject { status, response_code_detail, .. } => {
			assert_eq!(status, 429);
			assert_eq!(response_code_detail, "service_control_quota_error{ConsumerQuota}");
		},
		Decision::Forward { .. } => panic!("expected rejection on quota exhaustion"),
	}
	assert_eq!(info.response_code, 429);
}

#[tokio::test]
async fn check_call_failure_fails_open_when_configured() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	// check endpoint deliberately unmounted: every request 500s.
	Mock::given(method("POST"))
		.and(path("/v1/services/library.googleapis.com:check"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;
	mount_report(&server).await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), true)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let mut headers = HashMap::new();
	headers.insert("x-api-key".to_string(), "k1".to_string());
	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/v1/shelves/s1/books/b1".to_string(),
			headers,
		})
		.await;

	match decision {
		Decision::Forward { .. } => {},
		Decision::Reject { status, message, .. } => panic!("expected fail-open forward, got {status} {message}"),
	}
	assert_eq!(info.response_code, 200);
}

#[tokio::test]
async fn check_call_failure_rejects_with_503_when_not_failing_open() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	Mock::given(method("POST"))
		.and(path("/v1/services/library.googleapis.com:check"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let mut headers = HashMap::new();
	headers.insert("x-api-key".to_string(), "k1".to_string());
	let (decision, _info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/v1/shelves/s1/books/b1".to_string(),
			headers,
		})
		.await;

	match decision {
		Decision::Reject { status, .. } => assert_eq!(status, 503),
		Decision::Forward { .. } => panic!("expected rejection without fail-open"),
	}
}

#[tokio::test]
async fn unmatched_route_forwards_as_unknown_operation_without_calling_control_plane() {
	let server = MockServer::start().await;
	mount_token(&server).await;
	// No check/quota/report mocks mounted: an unmatched route must skip
	// service control entirely (synthetic `unknown()` requirement).

	let (gateway, _registry) = Gateway::new(&config_yaml(&server.uri(), false)).await.unwrap();
	let mut handler = gateway.new_request_handler();

	let (decision, info) = handler
		.on_headers(IncomingRequest {
			method: "GET".to_string(),
			path: "/totally/unknown/path".to_string(),
			headers: HashMap::new(),
		})
		.await;

	match decision {
		Decision::Forward { .. } => {},
		Decision::Reject { status, message, .. } => panic!("expected forward for unmatched route, got {status} {message}"),
	}
	assert_eq!(info.operation_id, "UNKNOWN_OPERATION");
}
