// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, register_int_counter_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // WORKER METRICS
    // ============================================================================

    /// Completed worker runs
    pub static ref WORKER_RUNS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("worker_runs_total", "Total completed worker runs"),
        &["outcome"], // outcome: local_hit, remote_hit, leader, follower, error
        REGISTRY
    ).unwrap();

    /// Worker run duration histogram
    pub static ref WORKER_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("worker_duration_seconds", "Worker run duration in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["outcome"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations per tier
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_operations_total", "Total cache operations"),
        &["tier", "result"], // result: hit, miss, write, failure
        REGISTRY
    ).unwrap();

    // ============================================================================
    // LOOKUP METRICS
    // ============================================================================

    /// Calls to the expensive lookup
    pub static ref LOOKUP_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("lookup_calls_total", "Total expensive lookup executions"),
        &["status"], // status: success, failure
        REGISTRY
    ).unwrap();

    /// Coalesced calls currently in flight
    pub static ref INFLIGHT_CALLS: Gauge = register_gauge_with_registry!(
        Opts::new("inflight_calls", "Coalesced calls currently executing"),
        REGISTRY
    ).unwrap();

    // ============================================================================
    // POOL METRICS
    // ============================================================================

    /// Tokens resident in the pool
    pub static ref TOKENS_AVAILABLE: Gauge = register_gauge_with_registry!(
        Opts::new("pool_tokens_available", "Tokens currently resident in the pool"),
        REGISTRY
    ).unwrap();

    /// Panics intercepted by the shield
    pub static ref SHIELD_FAULTS: IntCounter = register_int_counter_with_registry!(
        Opts::new("shield_faults_total", "Worker panics intercepted"),
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
