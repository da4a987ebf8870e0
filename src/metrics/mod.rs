// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    CACHE_OPERATIONS,
    INFLIGHT_CALLS,
    LOOKUP_CALLS,
    SHIELD_FAULTS,
    TOKENS_AVAILABLE,
    WORKER_DURATION,
    WORKER_RUNS,
};

use crate::cache::Tier;

/// Helper to record a finished worker run
pub fn record_worker_run(outcome: &str, duration_secs: f64) {
    WORKER_RUNS.with_label_values(&[outcome]).inc();
    WORKER_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Helper to record cache operations per tier
pub fn record_cache_operation(tier: Tier, result: &str) {
    CACHE_OPERATIONS
        .with_label_values(&[tier.as_str(), result])
        .inc();
}

pub fn record_lookup(success: bool) {
    let status = if success { "success" } else { "failure" };
    LOOKUP_CALLS.with_label_values(&[status]).inc();
}

pub fn inflight_started() {
    INFLIGHT_CALLS.inc();
}

pub fn inflight_finished() {
    INFLIGHT_CALLS.dec();
}

pub fn update_tokens_available(count: usize) {
    TOKENS_AVAILABLE.set(count as f64);
}

pub fn record_fault() {
    SHIELD_FAULTS.inc();
}
