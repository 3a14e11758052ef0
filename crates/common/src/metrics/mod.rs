//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all MatForge metrics
pub const METRICS_PREFIX: &str = "matforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 200ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025,
    0.050,  // P50 target
    0.100,
    0.200,  // P99 target
    0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for embedding latency (typically slower)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 30.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    describe_counter!(
        format!("{}_search_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Hybrid searches answered with one backend down"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    // Enrichment metrics
    describe_counter!(
        format!("{}_enrichment_items_total", METRICS_PREFIX),
        Unit::Count,
        "Total enrichment pipeline items processed"
    );

    describe_histogram!(
        format!("{}_enrichment_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-item enrichment latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    // Pool metrics
    describe_gauge!(
        format!("{}_pool_size", METRICS_PREFIX),
        Unit::Count,
        "Current connection pool size"
    );

    describe_gauge!(
        format!("{}_pool_in_use", METRICS_PREFIX),
        Unit::Count,
        "Connections currently checked out"
    );

    // Job metrics
    describe_gauge!(
        format!("{}_job_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Items waiting in the batch worker queue"
    );

    describe_counter!(
        format!("{}_job_items_total", METRICS_PREFIX),
        Unit::Count,
        "Batch items processed by terminal status"
    );

    // Analytics channel
    describe_counter!(
        format!("{}_analytics_dropped_total", METRICS_PREFIX),
        Unit::Count,
        "Analytics records dropped due to channel overflow"
    );

    // Tunnel
    describe_gauge!(
        format!("{}_tunnel_state", METRICS_PREFIX),
        Unit::Count,
        "Tunnel supervisor state (0=idle 1=connecting 2=active 3=degraded 4=stopped)"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, mode: &str, result_count: usize, degraded: bool) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);

    if degraded {
        counter!(format!("{}_search_degraded_total", METRICS_PREFIX)).increment(1);
    }

    gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }

    let _ = batch_size;
}

/// Helper to record one enrichment pipeline item
pub fn record_enrichment(duration_secs: f64, sku_found: bool) {
    counter!(
        format!("{}_enrichment_items_total", METRICS_PREFIX),
        "sku_found" => sku_found.to_string()
    )
    .increment(1);

    histogram!(format!("{}_enrichment_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to export pool utilization
pub fn record_pool(pool_name: &str, size: usize, in_use: usize) {
    gauge!(
        format!("{}_pool_size", METRICS_PREFIX),
        "pool" => pool_name.to_string()
    )
    .set(size as f64);

    gauge!(
        format!("{}_pool_in_use", METRICS_PREFIX),
        "pool" => pool_name.to_string()
    )
    .set(in_use as f64);
}

/// Helper to record a batch item reaching a terminal status
pub fn record_job_item(status: &str) {
    counter!(
        format!("{}_job_items_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Helper to record a dropped analytics record
pub fn record_analytics_dropped() {
    counter!(format!("{}_analytics_dropped_total", METRICS_PREFIX)).increment(1);
}

/// Helper to export the tunnel state
pub fn record_tunnel_state(state: u8) {
    gauge!(format!("{}_tunnel_state", METRICS_PREFIX)).set(state as f64);
}
