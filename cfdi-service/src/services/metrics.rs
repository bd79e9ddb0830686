//! Prometheus metrics for cfdi-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Orchestration outcomes by operation.
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cfdi_operations_total",
        "Total number of lifecycle operations by outcome",
        &["operation", "outcome"] // issue_invoice|consolidate|complement|cancel|reissue, ok|error
    )
    .expect("Failed to register operations_total")
});

/// Calls to the stamping provider by call and status.
pub static PROVIDER_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cfdi_provider_calls_total",
        "Total number of stamping provider calls",
        &["call", "status"]
    )
    .expect("Failed to register provider_calls_total")
});

/// Stamping provider latency.
pub static PROVIDER_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cfdi_provider_call_duration_seconds",
        "Stamping provider call duration in seconds",
        &["call"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register provider_call_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cfdi_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cfdi_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Stamped amounts by document kind.
pub static INVOICED_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cfdi_invoiced_amount_total",
        "Total stamped amount by document kind",
        &["kind"] // invoice, consolidated, complement
    )
    .expect("Failed to register invoiced_amount_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&PROVIDER_CALLS_TOTAL);
    Lazy::force(&PROVIDER_CALL_DURATION);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&INVOICED_AMOUNT_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
