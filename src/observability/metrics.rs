// ============================================================================
// PROMETHEUS METRICS - cache observability
// ============================================================================
// Exported on /metrics for Prometheus/Grafana
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    /// HTTP requests by method, endpoint and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========================================================================
    // DISTRIBUTED TIER
    // ========================================================================

    /// Cache hits
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_hits_total",
        "Total number of cache hits",
        &["cache_type", "cache_name"]
    )
    .unwrap();

    /// Cache misses
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_misses_total",
        "Total number of cache misses",
        &["cache_type", "cache_name"]
    )
    .unwrap();

    /// Writes by outcome: stored, skipped, serialization_failed, backend_failed
    pub static ref CACHE_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_writes_total",
        "Total cache writes by outcome",
        &["outcome"]
    )
    .unwrap();

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Invalidation requests by family and trigger (direct, cascade, admin)
    pub static ref CACHE_INVALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_invalidations_total",
        "Total cache invalidations",
        &["family", "trigger"]
    )
    .unwrap();

    pub static ref CACHE_KEYS_INVALIDATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_keys_invalidated_total",
        "Total cache keys removed by invalidation",
        &["family"]
    )
    .unwrap();

    // ========================================================================
    // WARM TIER
    // ========================================================================

    /// Warm task runs by outcome: success, error, panic
    pub static ref CACHE_WARM_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_warm_tasks_total",
        "Total warm task runs",
        &["task", "outcome"]
    )
    .unwrap();

    pub static ref CACHE_WARM_TASK_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_warm_task_duration_seconds",
        "Warm task duration in seconds",
        &["task"],
        vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Warm tier lookups, hit or miss
    pub static ref CACHE_WARM_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_warm_lookups_total",
        "Total warm tier lookups",
        &["aggregate", "result"]
    )
    .unwrap();

    /// Live entries in the warm tier
    pub static ref CACHE_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "cache_size",
        "Current cache size (number of entries)",
        &["cache_type", "cache_name"]
    )
    .unwrap();

    pub static ref CACHE_WARM_TENANTS: IntGaugeVec = register_int_gauge_vec!(
        "cache_warm_tenants",
        "Tenants enrolled in background warming",
        &["state"]
    )
    .unwrap();
}

/// Records one HTTP request
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

/// Records a distributed-tier hit or miss
pub fn record_cache_access(cache_type: &str, cache_name: &str, hit: bool) {
    if hit {
        CACHE_HITS_TOTAL
            .with_label_values(&[cache_type, cache_name])
            .inc();
    } else {
        CACHE_MISSES_TOTAL
            .with_label_values(&[cache_type, cache_name])
            .inc();
    }
}

pub fn record_cache_write(outcome: &str) {
    CACHE_WRITES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_invalidation(family: &str, trigger: &str, removed: u64) {
    CACHE_INVALIDATIONS_TOTAL
        .with_label_values(&[family, trigger])
        .inc();
    if removed > 0 {
        CACHE_KEYS_INVALIDATED_TOTAL
            .with_label_values(&[family])
            .inc_by(removed);
    }
}

pub fn record_warm_task(task: &str, outcome: &str, duration_secs: f64) {
    CACHE_WARM_TASKS_TOTAL
        .with_label_values(&[task, outcome])
        .inc();

    CACHE_WARM_TASK_DURATION_SECONDS
        .with_label_values(&[task])
        .observe(duration_secs);
}

pub fn record_warm_lookup(aggregate: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_WARM_LOOKUPS_TOTAL
        .with_label_values(&[aggregate, result])
        .inc();
}

/// Updates a cache size gauge
pub fn update_cache_size(cache_type: &str, cache_name: &str, size: i64) {
    CACHE_SIZE
        .with_label_values(&[cache_type, cache_name])
        .set(size);
}

pub fn update_warm_tenants(state: &str, count: i64) {
    CACHE_WARM_TENANTS.with_label_values(&[state]).set(count);
}
