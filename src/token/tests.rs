use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

#[test]
fn token_rejects_invalid_header_value() {
	let err = Token::new("bad\nvalue".to_string(), Duration::from_secs(60)).unwrap_err();
	assert!(matches!(err, Error::InvalidHeaderValue));
}

#[test]
fn token_rejects_zero_ttl() {
	let err = Token::new("ok".to_string(), Duration::from_secs(0)).unwrap_err();
	assert!(matches!(err, Error::InvalidHeaderValue));
}

#[tokio::test]
async fn imds_access_token_round_trip() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/token"))
		.and(header("Metadata-Flavor", "Google"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(serde_json::json!({"access_token": "tok-123", "expires_in": 3600})),
		)
		.mount(&server)
		.await;

	let client = reqwest::Client::new();
	let url = format!("{}/token", server.uri());
	let token = fetch_imds(&client, &url, TokenKind::Access).await.unwrap();
	assert_eq!(token.value(), "tok-123");
	assert!(token.remaining() > Duration::from_secs(3500));
}

#[tokio::test]
async fn imds_unmocked_endpoint_surfaces_status_error() {
	let server = MockServer::start().await;
	// No mock registered for this path: wiremock answers 404.
	let client = reqwest::Client::new();
	let url = format!("{}/token", server.uri());
	let err = fetch_imds(&client, &url, TokenKind::Access).await.unwrap_err();
	assert!(matches!(err, Error::Status(_)));
}

#[tokio::test]
async fn iam_access_token_requires_bootstrap() {
	let server = MockServer::start().await;
	let subscription = subscribe(
		"iam-test",
		Source::Iam {
			uri: format!("{}/generateAccessToken", server.uri()),
			delegates: vec![],
			scopes: vec!["https://www.googleapis.com/auth/cloud-platform".to_string()],
			include_email: false,
			audience: None,
		},
		TokenKind::Access,
		ErrorBehavior::AlwaysInit,
		reqwest::Client::new(),
		None,
	);
	let mut cache = subscription.cache();
	cache.wait_ready().await;
	// AlwaysInit makes readiness succeed even though preconditions were
	// never met (no bootstrap token supplied).
	assert!(cache.is_ready());
	assert_eq!(cache.current(), None);
}

#[test]
fn self_signed_jwt_surfaces_key_parse_errors() {
	// fetch_self_signed_jwt has no network dependency: a malformed key
	// fails locally and synchronously with a Jwt error, never a Transport
	// or Status error.
	let err = fetch_self_signed_jwt(
		&secrecy::SecretString::new("not a real key".into()),
		"issuer@example.iam.gserviceaccount.com",
		"https://example.com/api",
	)
	.unwrap_err();
	assert!(matches!(err, Error::Jwt(_)));
}

#[tokio::test]
async fn subscription_delivers_token_to_cache() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/token"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(serde_json::json!({"access_token": "abc", "expires_in": 3600})),
		)
		.mount(&server)
		.await;

	let subscription = subscribe(
		"imds-test",
		Source::Imds {
			url: format!("{}/token", server.uri()),
		},
		TokenKind::Access,
		ErrorBehavior::AlwaysInit,
		reqwest::Client::new(),
		None,
	);
	let mut cache = subscription.cache();
	cache.wait_ready().await;
	assert_eq!(cache.current(), Some("abc".to_string()));
}

#[tokio::test]
async fn block_until_ready_does_not_ready_on_failure() {
	let server = MockServer::start().await;
	// No mocks registered: every request 404s.
	let subscription = subscribe(
		"blocking-test",
		Source::Imds {
			url: format!("{}/token", server.uri()),
		},
		TokenKind::Access,
		ErrorBehavior::BlockUntilReady,
		reqwest::Client::new(),
		None,
	);
	let cache = subscription.cache();
	let waited = tokio::time::timeout(Duration::from_millis(200), {
		let mut c = cache.clone();
		async move { c.wait_ready().await }
	})
	.await;
	assert!(waited.is_err(), "should not become ready on persistent failure");
}

#[test]
fn qualify_delegate_adds_prefix() {
	assert_eq!(
		qualify_delegate("foo@bar.iam.gserviceaccount.com"),
		"projects/-/serviceAccounts/foo@bar.iam.gserviceaccount.com"
	);
	assert_eq!(
		qualify_delegate("projects/-/serviceAccounts/already"),
		"projects/-/serviceAccounts/already"
	);
}
