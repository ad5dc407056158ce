/*!
 * Prometheus Metrics for the Executor
 *
 * Exposed on /metrics for Prometheus scraping.
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder, opts,
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    /// Execution requests consumed from the stream
    pub static ref REQUESTS_CONSUMED_TOTAL: IntCounter = register_int_counter!(opts!(
        "executor_requests_consumed_total",
        "Total execution requests consumed from the request stream"
    ))
    .expect("metric can be created");

    /// Executions finished, by outcome (success or tagged error)
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "executor_executions_total",
            "Total executions finished, labeled by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can be created");

    /// Results published to the result stream
    pub static ref RESULTS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(opts!(
        "executor_results_published_total",
        "Total execution results published"
    ))
    .expect("metric can be created");

    /// Duplicate handling, by action taken
    pub static ref DUPLICATES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "executor_duplicates_total",
            "Duplicate or contended requests, labeled by action"
        ),
        &["action"]
    )
    .expect("metric can be created");

    /// Entries moved to the execution DLQ
    pub static ref EXECUTION_DLQ_TOTAL: IntCounter = register_int_counter!(opts!(
        "executor_execution_dlq_total",
        "Poison entries moved to the execution DLQ"
    ))
    .expect("metric can be created");

    /// Idle pending entries reclaimed from crashed consumers
    pub static ref RECLAIMED_TOTAL: IntCounter = register_int_counter!(opts!(
        "executor_reclaimed_total",
        "Pending entries claimed back after exceeding the lock TTL"
    ))
    .expect("metric can be created");

    /// Entries currently inside the worker pool
    pub static ref IN_FLIGHT: IntGauge = register_int_gauge!(opts!(
        "executor_in_flight",
        "Entries currently held by execution workers"
    ))
    .expect("metric can be created");

    /// End-to-end worker latency per entry
    pub static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "executor_execution_duration_seconds",
        "Per-entry execution duration in seconds",
        &["outcome"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("metric can be created");
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
