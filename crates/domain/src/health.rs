/*!
 * Heartbeats, Degradation Levels, and Coordinator Events
 *
 * Every service publishes a `Heartbeat` record to
 * `stream:service-heartbeats` at a fixed cadence. The active coordinator's
 * health monitor folds the stream into per-service freshness and classifies
 * the region into a `DegradationLevel`. Level transitions and leadership
 * changes are published as `CoordinatorEvent`s on
 * `stream:coordinator-events`.
 */

use serde::{Deserialize, Serialize};

/// Role a service plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    Coordinator,
    Partition,
    Executor,
    Detector,
}

impl ServiceRole {
    /// Critical roles force `critical` classification when stale: losing the
    /// executor or the coordinator halts the pipeline outright, while a
    /// partition or detector only degrades coverage.
    pub fn is_critical(&self) -> bool {
        matches!(self, ServiceRole::Coordinator | ServiceRole::Executor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Coordinator => "coordinator",
            ServiceRole::Partition => "partition",
            ServiceRole::Executor => "executor",
            ServiceRole::Detector => "detector",
        }
    }
}

impl std::str::FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" => Ok(ServiceRole::Coordinator),
            "partition" => Ok(ServiceRole::Partition),
            "executor" => Ok(ServiceRole::Executor),
            "detector" => Ok(ServiceRole::Detector),
            other => Err(format!("unknown service role: {other:?}")),
        }
    }
}

/// Self-reported lifecycle state carried inside a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportedState {
    Starting,
    Healthy,
    Degraded,
    Failed,
}

/// Monotone per-service counters carried inside a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCounters {
    pub messages_processed_total: u64,
    pub errors_total: u64,
    pub queue_depth: u64,
}

/// Per-service liveness record, refreshed at a fixed cadence.
///
/// `last_beat_at` is monotone per `service_id`; the record expires
/// implicitly once `now - last_beat_at` exceeds the stale threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub service_id: String,
    pub role: ServiceRole,
    pub last_beat_at: i64,
    pub reported_state: ReportedState,
    #[serde(default)]
    pub counters: ServiceCounters,
}

/// Region-wide health classification derived from observed heartbeats.
///
/// Variant order is severity order: later variants are more degraded, so
/// `Ord` comparisons read as "worse than".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationLevel {
    Normal,
    Partial,
    Critical,
    CompleteOutage,
}

impl DegradationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Partial => "partial",
            DegradationLevel::Critical => "critical",
            DegradationLevel::CompleteOutage => "complete-outage",
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severities attached to dispatched alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// What happened, for entries on `stream:coordinator-events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoordinatorEventKind {
    LeaderElected,
    LeaderDemoted {
        reason: String,
    },
    DegradationChanged {
        from: DegradationLevel,
        to: DegradationLevel,
        stale_services: Vec<String>,
    },
    PipelineStarvation {
        detector_messages: u64,
    },
    Alert {
        severity: AlertSeverity,
        message: String,
    },
}

/// Envelope for coordinator-event stream entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorEvent {
    #[serde(flatten)]
    pub kind: CoordinatorEventKind,
    pub instance_id: String,
    pub region: String,
    pub at: i64,
}

impl CoordinatorEvent {
    pub fn new(kind: CoordinatorEventKind, instance_id: &str, region: &str) -> Self {
        Self {
            kind,
            instance_id: instance_id.to_string(),
            region: region.to_string(),
            at: crate::now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_severity_order() {
        assert!(DegradationLevel::Partial > DegradationLevel::Normal);
        assert!(DegradationLevel::Critical > DegradationLevel::Partial);
        assert!(DegradationLevel::CompleteOutage > DegradationLevel::Critical);
    }

    #[test]
    fn test_degradation_wire_names() {
        assert_eq!(
            serde_json::to_string(&DegradationLevel::CompleteOutage).unwrap(),
            "\"complete-outage\""
        );
        let parsed: DegradationLevel = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(parsed, DegradationLevel::Partial);
    }

    #[test]
    fn test_critical_roles() {
        assert!(ServiceRole::Executor.is_critical());
        assert!(ServiceRole::Coordinator.is_critical());
        assert!(!ServiceRole::Partition.is_critical());
        assert!(!ServiceRole::Detector.is_critical());
    }

    #[test]
    fn test_role_round_trip_from_str() {
        for role in [
            ServiceRole::Coordinator,
            ServiceRole::Partition,
            ServiceRole::Executor,
            ServiceRole::Detector,
        ] {
            let parsed: ServiceRole = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("operator".parse::<ServiceRole>().is_err());
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let beat = Heartbeat {
            service_id: "executor-1".into(),
            role: ServiceRole::Executor,
            last_beat_at: 1_700_000_000_000,
            reported_state: ReportedState::Healthy,
            counters: ServiceCounters {
                messages_processed_total: 12,
                errors_total: 1,
                queue_depth: 3,
            },
        };

        let json: serde_json::Value = serde_json::to_value(&beat).unwrap();
        assert_eq!(json["serviceId"], "executor-1");
        assert_eq!(json["role"], "executor");
        assert_eq!(json["reportedState"], "healthy");
        assert_eq!(json["counters"]["messagesProcessedTotal"], 12);
    }

    #[test]
    fn test_coordinator_event_tagging() {
        let event = CoordinatorEvent::new(
            CoordinatorEventKind::DegradationChanged {
                from: DegradationLevel::Normal,
                to: DegradationLevel::Critical,
                stale_services: vec!["partition-eu".into()],
            },
            "coordinator-a",
            "us-east",
        );

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "degradation-changed");
        assert_eq!(json["from"], "normal");
        assert_eq!(json["to"], "critical");
        assert_eq!(json["instanceId"], "coordinator-a");

        let back: CoordinatorEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
