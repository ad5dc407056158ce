/*!
 * Prometheus Metrics for the Coordinator
 *
 * Exposed on /metrics for Prometheus scraping.
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, opts, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    /// Opportunities forwarded to the execution-request stream
    pub static ref OPPORTUNITIES_FORWARDED_TOTAL: IntCounter = register_int_counter!(opts!(
        "coordinator_opportunities_forwarded_total",
        "Total opportunities forwarded to the execution-request stream"
    ))
    .expect("metric can be created");

    /// Entries routed to the forwarding DLQ, by reason
    pub static ref FORWARDING_DLQ_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "coordinator_forwarding_dlq_total",
            "Total opportunity entries dead-lettered by the forwarder"
        ),
        &["reason"]
    )
    .expect("metric can be created");

    /// Forwarding failures that left entries un-acked (substrate loss)
    pub static ref FORWARD_ERRORS_TOTAL: IntCounter = register_int_counter!(opts!(
        "coordinator_forward_errors_total",
        "Total forwarding iterations halted by substrate unavailability"
    ))
    .expect("metric can be created");

    /// Leadership transitions, by direction
    pub static ref LEADER_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "coordinator_leader_transitions_total",
            "Total leadership transitions of this instance"
        ),
        &["transition"]
    )
    .expect("metric can be created");

    /// 1 while this instance holds the lease
    pub static ref IS_LEADER: IntGauge = register_int_gauge!(opts!(
        "coordinator_is_leader",
        "Whether this instance currently holds the leader lease"
    ))
    .expect("metric can be created");

    /// Current degradation level (0=normal 1=partial 2=critical 3=complete-outage)
    pub static ref DEGRADATION_LEVEL: IntGauge = register_int_gauge!(opts!(
        "coordinator_degradation_level",
        "Current regional degradation level"
    ))
    .expect("metric can be created");

    /// Stale services seen at the last evaluation
    pub static ref STALE_SERVICES: IntGauge = register_int_gauge!(opts!(
        "coordinator_stale_services",
        "Services whose heartbeat exceeded the stale threshold"
    ))
    .expect("metric can be created");

    /// Alerts dispatched, by severity
    pub static ref ALERTS_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "coordinator_alerts_dispatched_total",
            "Total alerts dispatched by the active coordinator"
        ),
        &["severity"]
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
