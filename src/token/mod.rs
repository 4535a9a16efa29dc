//! Token supplier (C4).
//!
//! Produces and continuously refreshes the bearer tokens handed to the
//! Service-Control RPCs (C5): access tokens for `:check`/`:allocateQuota`/
//! `:report`, identity tokens for the protected backend. Grounded on the
//! teacher's `control::caclient::WorkloadCertificate` refresh scheduling
//! (fetch, schedule a refresh at a fraction of the remaining validity,
//! deliver via a `tokio::sync::watch` channel) generalized from mTLS
//! certificate rotation to OAuth2/JWT bearer tokens, per
//! `original_source/src/api_proxy/auth_token/...` for the three sources.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

/// Buffer subtracted from `expires_in` before scheduling the next refresh.
const REFRESH_BUFFER: Duration = Duration::from_secs(5);
/// Fixed backoff between a failed fetch and the next attempt.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Self-signed JWTs are reminted well inside their nominal 1h lifetime.
const SELF_SIGNED_JWT_TTL: Duration = Duration::from_secs(55 * 60);
/// Bound on the startup fetch so a hung metadata server cannot stall
/// config readiness forever.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("token request failed: {0}")]
	Transport(Arc<reqwest::Error>),
	#[error("token endpoint returned status {0}")]
	Status(reqwest::StatusCode),
	#[error("token endpoint response was not valid JSON: {0}")]
	Json(Arc<serde_json::Error>),
	#[error("token value is not a valid HTTP header value")]
	InvalidHeaderValue,
	#[error("failed to sign JWT: {0}")]
	Jwt(Arc<jsonwebtoken::errors::Error>),
	#[error("preconditions not met: bootstrap access token is not yet available")]
	PreconditionsNotMet,
}

impl From<reqwest::Error> for Error {
	fn from(e: reqwest::Error) -> Self {
		Error::Transport(Arc::new(e))
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Error::Json(Arc::new(e))
	}
}

impl From<jsonwebtoken::errors::Error> for Error {
	fn from(e: jsonwebtoken::errors::Error) -> Self {
		Error::Jwt(Arc::new(e))
	}
}

/// What kind of token a subscription produces; selects the IAM RPC and
/// the default validity assumed for the IMDS identity-token response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
	Access,
	Identity,
}

/// A cached token plus its expiry. Invariant: `value` passes HTTP
/// header-value validity and `expiry` is strictly in the future at the
/// moment it is cached (enforced by `Token::new`).
#[derive(Debug, Clone)]
pub struct Token {
	value: String,
	expiry: Instant,
}

impl Token {
	fn new(value: String, ttl: Duration) -> Result<Self, Error> {
		if http::HeaderValue::from_str(&value).is_err() {
			return Err(Error::InvalidHeaderValue);
		}
		if ttl.is_zero() {
			return Err(Error::InvalidHeaderValue);
		}
		Ok(Token {
			value,
			expiry: Instant::now() + ttl,
		})
	}

	pub fn value(&self) -> &str {
		&self.value
	}

	pub fn remaining(&self) -> Duration {
		self.expiry.saturating_duration_since(Instant::now())
	}

	/// Build a token directly for tests exercising callers of `TokenCache`
	/// (e.g. C5's call factory) without running a refresh loop.
	#[cfg(test)]
	pub fn for_test(value: String) -> Self {
		Token {
			value,
			expiry: Instant::now() + Duration::from_secs(3600),
		}
	}
}

/// Error-behavior policy controlling whether a subscription blocks
/// config readiness until its first successful fetch.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorBehavior {
	/// Readiness succeeds independent of token freshness.
	#[default]
	AlwaysInit,
	/// Readiness blocks until a token has been fetched at least once.
	BlockUntilReady,
}

/// One named delegate in an IAM delegate chain, stored pre-qualified
/// (`projects/-/serviceAccounts/{email}`).
fn qualify_delegate(raw: &str) -> String {
	if raw.starts_with("projects/") {
		raw.to_string()
	} else {
		format!("projects/-/serviceAccounts/{raw}")
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Source {
	/// Instance metadata server.
	Imds { url: String },
	/// IAM `generateAccessToken` / `generateIdToken`.
	Iam {
		uri: String,
		delegates: Vec<String>,
		scopes: Vec<String>,
		include_email: bool,
		/// Only used for identity tokens: the `audience` claim requested.
		audience: Option<String>,
	},
	/// Self-signed JWT minted from a service-account key, no network call.
	SelfSignedJwt {
		/// Accepts either an inline PEM string or `{file: <path>}`, per
		/// [`crate::serdes::FileOrInline`].
		#[serde(deserialize_with = "crate::serdes::deser_key_from_file")]
		private_key_pem: secrecy::SecretString,
		issuer: String,
		audience: String,
	},
}

#[derive(serde::Deserialize)]
struct ImdsAccessTokenResponse {
	access_token: String,
	expires_in: u64,
}

#[derive(serde::Serialize)]
struct IamAccessTokenRequest<'a> {
	delegates: &'a [String],
	scope: &'a [String],
}

#[derive(serde::Deserialize)]
struct IamAccessTokenResponse {
	#[serde(rename = "accessToken")]
	access_token: String,
	#[serde(rename = "expireTime")]
	expire_time: String,
}

#[derive(serde::Serialize)]
struct IamIdTokenRequest<'a> {
	delegates: &'a [String],
	audience: &'a str,
	#[serde(rename = "includeEmail")]
	include_email: bool,
}

#[derive(serde::Deserialize)]
struct IamIdTokenResponse {
	token: String,
}

#[derive(serde::Serialize)]
struct SelfSignedClaims<'a> {
	iss: &'a str,
	sub: &'a str,
	aud: &'a str,
	iat: i64,
	exp: i64,
}

async fn fetch_imds(client: &reqwest::Client, url: &str, kind: TokenKind) -> Result<Token, Error> {
	let resp = client
		.get(url)
		.header("Metadata-Flavor", "Google")
		.send()
		.await?;
	if !resp.status().is_success() {
		return Err(Error::Status(resp.status()));
	}
	match kind {
		TokenKind::Access => {
			let body: ImdsAccessTokenResponse = resp.json().await?;
			Token::new(body.access_token, Duration::from_secs(body.expires_in))
		},
		TokenKind::Identity => {
			let body = resp.text().await?;
			Token::new(body.trim().to_string(), Duration::from_secs(3600))
		},
	}
}

async fn fetch_iam(
	client: &reqwest::Client,
	uri: &str,
	delegates: &[String],
	scopes: &[String],
	include_email: bool,
	audience: Option<&str>,
	kind: TokenKind,
	bootstrap_token: &str,
) -> Result<Token, Error> {
	let delegates: Vec<String> = delegates.iter().map(|d| qualify_delegate(d)).collect();
	let req = client
		.post(uri)
		.bearer_auth(bootstrap_token)
		.header("Content-Type", "application/json; charset=utf-8");

	match kind {
		TokenKind::Access => {
			let body = IamAccessTokenRequest {
				delegates: &delegates,
				scope: scopes,
			};
			let resp = req.json(&body).send().await?;
			if !resp.status().is_success() {
				return Err(Error::Status(resp.status()));
			}
			let parsed: IamAccessTokenResponse = resp.json().await?;
			let ttl = parse_rfc3339_remaining(&parsed.expire_time).unwrap_or(Duration::from_secs(3600));
			Token::new(parsed.access_token, ttl)
		},
		TokenKind::Identity => {
			let aud = audience.unwrap_or_default();
			let body = IamIdTokenRequest {
				delegates: &delegates,
				audience: aud,
				include_email,
			};
			let resp = req.json(&body).send().await?;
			if !resp.status().is_success() {
				return Err(Error::Status(resp.status()));
			}
			let parsed: IamIdTokenResponse = resp.json().await?;
			Token::new(parsed.token, Duration::from_secs(3600))
		},
	}
}

fn parse_rfc3339_remaining(expire_time: &str) -> Option<Duration> {
	let at = chrono::DateTime::parse_from_rfc3339(expire_time).ok()?;
	let now = chrono::Utc::now();
	let delta = at.with_timezone(&chrono::Utc) - now;
	delta.to_std().ok()
}

fn fetch_self_signed_jwt(
	private_key_pem: &secrecy::SecretString,
	issuer: &str,
	audience: &str,
) -> Result<Token, Error> {
	use secrecy::ExposeSecret;
	let now = chrono::Utc::now().timestamp();
	let claims = SelfSignedClaims {
		iss: issuer,
		sub: issuer,
		aud: audience,
		iat: now,
		exp: now + SELF_SIGNED_JWT_TTL.as_secs() as i64,
	};
	let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.expose_secret().as_bytes())?;
	let jwt = jsonwebtoken::encode(&jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256), &claims, &key)?;
	Token::new(jwt, SELF_SIGNED_JWT_TTL)
}

/// A live handle to a refreshed token. Cloneable; readers take a
/// snapshot via `current()` before each outbound call, per the
/// per-worker shared-resource policy.
#[derive(Clone)]
pub struct TokenCache {
	rx: watch::Receiver<Option<Token>>,
	ready: watch::Receiver<bool>,
}

impl TokenCache {
	/// Returns the current cached token value, or `None` if no token has
	/// ever been fetched successfully. Per C5, an empty result short-
	/// circuits the call to the "missing credentials" failure.
	pub fn current(&self) -> Option<String> {
		self.rx.borrow().as_ref().map(|t| t.value.clone())
	}

	/// Await until the subscription becomes ready (per its `ErrorBehavior`).
	pub async fn wait_ready(&mut self) {
		if *self.ready.borrow() {
			return;
		}
		let _ = self.ready.changed().await;
	}

	pub fn is_ready(&self) -> bool {
		*self.ready.borrow()
	}

	/// Construct a cache directly from channel halves, for tests of
	/// downstream consumers (C5) that don't need a real refresh loop.
	#[cfg(test)]
	pub fn for_test(rx: watch::Receiver<Option<Token>>, ready: watch::Receiver<bool>) -> Self {
		TokenCache { rx, ready }
	}
}

/// Owns the refresh task for one token subscription. Dropping it cancels
/// the task: no callback fires afterward, matching the spec's
/// cancel-on-destroy semantics.
pub struct Subscription {
	handle: tokio::task::JoinHandle<()>,
	cache: TokenCache,
}

impl Subscription {
	pub fn cache(&self) -> TokenCache {
		self.cache.clone()
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

/// Spawn a refresh loop for `source`, labeled `name` for tracing/logs.
///
/// `bootstrap` supplies the access token IAM subscriptions depend on; it
/// is ignored by IMDS and self-signed-JWT sources.
pub fn subscribe(
	name: impl Into<String>,
	source: Source,
	kind: TokenKind,
	behavior: ErrorBehavior,
	client: reqwest::Client,
	bootstrap: Option<TokenCache>,
) -> Subscription {
	let name = name.into();
	let (tx, rx) = watch::channel(None);
	let (ready_tx, ready_rx) = watch::channel(false);

	let handle = tokio::spawn(
		async move {
			let mut first = true;
			loop {
				let attempt = fetch_once(&source, kind, &client, bootstrap.as_ref());
				let outcome = if first {
					tokio::time::timeout(STARTUP_TIMEOUT, attempt)
						.await
						.unwrap_or(Err(Error::Status(reqwest::StatusCode::GATEWAY_TIMEOUT)))
				} else {
					attempt.await
				};
				first = false;

				let next_delay = match outcome {
					Ok(token) => {
						let remaining = token.remaining();
						let delay = remaining.saturating_sub(REFRESH_BUFFER);
						debug!(subscription = %name, remaining_secs = remaining.as_secs(), "token refreshed");
						let _ = tx.send(Some(token));
						let _ = ready_tx.send(true);
						if delay.is_zero() {
							RETRY_BACKOFF
						} else {
							delay
						}
					},
					Err(e) => {
						warn!(subscription = %name, error = %e, "token refresh failed");
						if behavior == ErrorBehavior::AlwaysInit {
							let _ = ready_tx.send(true);
						}
						RETRY_BACKOFF
					},
				};
				tokio::time::sleep(next_delay).await;
			}
		}
		.instrument(tracing::info_span!("token_subscription", name = %name)),
	);

	Subscription {
		handle,
		cache: TokenCache { rx, ready: ready_rx },
	}
}

async fn fetch_once(
	source: &Source,
	kind: TokenKind,
	client: &reqwest::Client,
	bootstrap: Option<&TokenCache>,
) -> Result<Token, Error> {
	match source {
		Source::Imds { url } => fetch_imds(client, url, kind).await,
		Source::Iam {
			uri,
			delegates,
			scopes,
			include_email,
			audience,
		} => {
			let bootstrap_token = bootstrap
				.and_then(|b| b.current())
				.ok_or(Error::PreconditionsNotMet)?;
			fetch_iam(
				client,
				uri,
				delegates,
				scopes,
				*include_email,
				audience.as_deref(),
				kind,
				&bootstrap_token,
			)
			.await
		},
		Source::SelfSignedJwt {
			private_key_pem,
			issuer,
			audience,
		} => fetch_self_signed_jwt(private_key_pem, issuer, audience),
	}
}

/// Log a token-acquisition attempt at info level; kept as a separate
/// function so the handler's reporting path (C8) can record it without
/// depending on the refresh loop's private state.
pub fn log_subscription_started(name: &str, kind: TokenKind) {
	info!(subscription = name, ?kind, "token subscription started");
}
