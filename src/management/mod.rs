//! Admin HTTP surface: `/metrics` (Prometheus text exposition) and
//! `/healthz` (readiness). Ambient observability the teacher exposes
//! through its `management::metrics_server`/`readiness_server` pair of
//! raw-hyper servers (see `examples/vishalbelsare-agentgateway`'s
//! `crates/agentgateway/src/management/`); this module covers the same
//! ground with an `axum::Router` instead of the teacher's bespoke
//! `hyper_helpers::Server`, since this crate doesn't carry the
//! `agent_core` drain/address plumbing the teacher's version binds to.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
	Ready,
	NotReady,
}

#[derive(Clone)]
struct ManagementState {
	registry: Arc<Mutex<Registry>>,
	ready: Arc<Mutex<Readiness>>,
}

/// Builds the router; callers bind it with `axum::serve` on whatever
/// address the admin config names.
pub fn router(registry: Registry) -> (Router, Arc<Mutex<Readiness>>) {
	let ready = Arc::new(Mutex::new(Readiness::NotReady));
	let state = ManagementState {
		registry: Arc::new(Mutex::new(registry)),
		ready: ready.clone(),
	};
	let router = Router::new()
		.route("/metrics", get(handle_metrics))
		.route("/healthz", get(handle_healthz))
		.layer(TraceLayer::new_for_http())
		.with_state(state);
	(router, ready)
}

pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!(%addr, "management server listening");
	axum::serve(listener, router).await?;
	Ok(())
}

async fn handle_metrics(State(state): State<ManagementState>, headers: HeaderMap) -> impl IntoResponse {
	let mut buf = String::new();
	let registry = state.registry.lock().expect("registry mutex poisoned");
	if let Err(err) = encode(&mut buf, &registry) {
		return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain")], err.to_string()).into_response();
	}
	drop(registry);
	(StatusCode::OK, [(header::CONTENT_TYPE, content_type(&headers))], buf).into_response()
}

async fn handle_healthz(State(state): State<ManagementState>) -> impl IntoResponse {
	match *state.ready.lock().expect("readiness mutex poisoned") {
		Readiness::Ready => (StatusCode::OK, "ready\n"),
		Readiness::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not ready\n"),
	}
}

fn content_type(headers: &HeaderMap) -> &'static str {
	let wants_openmetrics = headers
		.get_all(header::ACCEPT)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.any(|v| v.to_ascii_lowercase().starts_with("application/openmetrics-text"));
	if wants_openmetrics {
		"application/openmetrics-text;charset=utf-8;version=1.0.0"
	} else {
		"text/plain; charset=utf-8"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn openmetrics_accept_header_is_honored() {
		let mut headers = HeaderMap::new();
		headers.insert(header::ACCEPT, "application/openmetrics-text; q=1".parse().unwrap());
		assert_eq!(content_type(&headers), "application/openmetrics-text;charset=utf-8;version=1.0.0");
	}

	#[test]
	fn missing_accept_header_falls_back_to_plaintext() {
		assert_eq!(content_type(&HeaderMap::new()), "text/plain; charset=utf-8");
	}
}
