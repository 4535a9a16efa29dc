//! Stats surface (§6 "Stats (observability)").
//!
//! Grounded on the teacher's `telemetry::metrics::Metrics::new`
//! registration pattern (`Family<Labels, Counter>` built through a small
//! closure, registered into a `prometheus_client::registry::Registry`).

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// `service_control.{allowed, denied, allowed_control_plane_fault,
/// denied_control_plane_fault, denied_consumer_{blocked,error,quota},
/// denied_producer_error}`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Decision {
	Allowed,
	Denied,
	AllowedControlPlaneFault,
	DeniedControlPlaneFault,
	DeniedConsumerBlocked,
	DeniedConsumerError,
	DeniedConsumerQuota,
	DeniedProducerError,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Rpc {
	Check,
	AllocateQuota,
	Report,
}

impl Rpc {
	/// Name used both as the trace span label and (indirectly, via
	/// `Debug`/`EncodeLabelValue`) the metric label.
	pub fn label(&self) -> &'static str {
		match self {
			Rpc::Check => "Check",
			Rpc::AllocateQuota => "AllocateQuota",
			Rpc::Report => "Report",
		}
	}
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum MatchOutcome {
	Allowed,
	Denied,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RewriteOutcome {
	PathChanged,
	PathNotChanged,
	DeniedByBadRequest,
	DeniedByUndefinedRequest,
	DeniedByWrongRouteConfig,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
	pub decision: Decision,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CallStatusLabels {
	pub rpc: Rpc,
	pub code: u32,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MatchLabels {
	pub outcome: MatchOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RewriteLabels {
	pub outcome: RewriteOutcome,
}

pub struct Metrics {
	/// `service_control.{allowed,denied,...}`.
	pub service_control_decisions: Family<DecisionLabels, Counter>,
	/// `service_control.{check,allocate_quota,report}.<code>`.
	pub service_control_call_status: Family<CallStatusLabels, Counter>,
	/// `service_control.request_time`.
	pub request_time: Histogram,
	/// `service_control.backend_time`.
	pub backend_time: Histogram,
	/// `service_control.overhead_time`.
	pub overhead_time: Histogram,
	/// path-matcher `{allowed, denied}`.
	pub path_matcher: Family<MatchLabels, Counter>,
	/// path-rewrite `{path_changed, path_not_changed, denied_by_*}`.
	pub path_rewrite: Family<RewriteLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let service_control_decisions = Family::default();
		registry.register(
			"service_control_decisions",
			"Request admission decisions made by the Service-Control check/quota pipeline",
			service_control_decisions.clone(),
		);

		let service_control_call_status = Family::default();
		registry.register(
			"service_control_call_status",
			"Per-RPC HTTP status counters for check/allocateQuota/report calls",
			service_control_call_status.clone(),
		);

		// Time buckets: 29 exponential buckets, growth 2.0, scale 1e-6 (§4.8).
		let request_time = Histogram::new(exponential_buckets(1e-6, 2.0, 29));
		registry.register(
			"service_control_request_time",
			"Total request latency observed for reporting",
			request_time.clone(),
		);
		let backend_time = Histogram::new(exponential_buckets(1e-6, 2.0, 29));
		registry.register(
			"service_control_backend_time",
			"Backend latency observed for reporting",
			backend_time.clone(),
		);
		let overhead_time = Histogram::new(exponential_buckets(1e-6, 2.0, 29));
		registry.register(
			"service_control_overhead_time",
			"Gateway overhead latency observed for reporting",
			overhead_time.clone(),
		);

		let path_matcher = Family::default();
		registry.register(
			"path_matcher",
			"Path-matcher lookup outcomes",
			path_matcher.clone(),
		);

		let path_rewrite = Family::default();
		registry.register(
			"path_rewrite",
			"Path-rewrite outcomes",
			path_rewrite.clone(),
		);

		Metrics {
			service_control_decisions,
			service_control_call_status,
			request_time,
			backend_time,
			overhead_time,
			path_matcher,
			path_rewrite,
		}
	}

	pub fn record_decision(&self, decision: Decision) {
		self
			.service_control_decisions
			.get_or_create(&DecisionLabels { decision })
			.inc();
	}

	pub fn record_call_status(&self, rpc: Rpc, code: u32) {
		self
			.service_control_call_status
			.get_or_create(&CallStatusLabels { rpc, code })
			.inc();
	}

	pub fn record_match(&self, outcome: MatchOutcome) {
		self.path_matcher.get_or_create(&MatchLabels { outcome }).inc();
	}

	pub fn record_rewrite(&self, outcome: RewriteOutcome) {
		self.path_rewrite.get_or_create(&RewriteLabels { outcome }).inc();
	}
}

/// Exponential histogram bucket boundaries: `scale * growth^i` for
/// `i in 0..count`, matching §4.8's fixed-parameter distributions.
fn exponential_buckets(scale: f64, growth: f64, count: usize) -> impl Iterator<Item = f64> {
	(0..count).map(move |i| scale * growth.powi(i as i32))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registers_without_panic() {
		let mut registry = Registry::default();
		let m = Metrics::new(&mut registry);
		m.record_decision(Decision::Allowed);
		m.record_decision(Decision::DeniedConsumerQuota);
		m.record_call_status(Rpc::Check, 200);
		m.record_match(MatchOutcome::Allowed);
		m.record_rewrite(RewriteOutcome::PathChanged);
		m.request_time.observe(0.005);
	}
}
