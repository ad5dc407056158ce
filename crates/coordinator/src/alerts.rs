/*!
 * Coordinator Events and Alert Dispatch
 *
 * Leadership and degradation transitions are published to
 * `stream:coordinator-events` for downstream observers (dashboards, pagers).
 * Alert dispatch is active-only: a demoted coordinator stops publishing
 * within one heartbeat.
 */

use tracing::{info, warn};

use arbflow_common::{Result, StreamBus};
use arbflow_config::topology;
use arbflow_domain::{AlertSeverity, CoordinatorEvent, CoordinatorEventKind};

use crate::metrics;

/// Publishes coordinator events and alerts for one instance/region.
pub struct EventPublisher {
    bus: StreamBus,
    instance_id: String,
    region: String,
    max_len: usize,
}

impl Clone for EventPublisher {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            instance_id: self.instance_id.clone(),
            region: self.region.clone(),
            max_len: self.max_len,
        }
    }
}

impl EventPublisher {
    pub fn new(bus: StreamBus, instance_id: &str, region: &str, max_len: usize) -> Self {
        Self {
            bus,
            instance_id: instance_id.to_string(),
            region: region.to_string(),
            max_len,
        }
    }

    /// Publish a coordinator event. Failures are surfaced to the caller;
    /// event publication is advisory and never blocks pipeline progress.
    pub async fn publish(&mut self, kind: CoordinatorEventKind) -> Result<String> {
        let event = CoordinatorEvent::new(kind, &self.instance_id, &self.region);
        self.bus
            .publish(topology::COORDINATOR_EVENTS, &event, self.max_len)
            .await
    }

    /// Publish an alert event and log it. Alert severity maps onto the log
    /// level so a pager-less deployment still surfaces everything.
    pub async fn alert(&mut self, severity: AlertSeverity, message: &str) {
        match severity {
            AlertSeverity::Info => info!("[alert] {}", message),
            AlertSeverity::Warning | AlertSeverity::Critical => warn!("[alert] {}", message),
        }

        let severity_label = match severity {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        metrics::ALERTS_DISPATCHED_TOTAL
            .with_label_values(&[severity_label])
            .inc();

        if let Err(e) = self
            .publish(CoordinatorEventKind::Alert {
                severity,
                message: message.to_string(),
            })
            .await
        {
            warn!("Failed to publish alert event: {}", e);
        }
    }
}
