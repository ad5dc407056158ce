/*!
 * Health Monitor and Degradation Classifier
 *
 * Runs on the active coordinator only. Every evaluation interval it folds
 * the tail of `stream:service-heartbeats` into per-service freshness and
 * classifies the region:
 *
 * | Observed condition                                        | Level           |
 * |-----------------------------------------------------------|-----------------|
 * | all fresh, none degraded                                  | normal          |
 * | some stale/degraded, no majority                          | partial         |
 * | stale majority, or any critical-role service stale        | critical        |
 * | every registered service stale (outside startup grace)    | complete-outage |
 *
 * Transitions are hysteresis-gated (N consecutive evaluations in either
 * direction) to suppress flapping, then published as coordinator events and
 * dispatched as alerts.
 *
 * Substrate loss freezes classification at its last level; evaluation
 * resumes (and the hysteresis cycle restarts) when Redis returns.
 */

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use arbflow_common::StreamBus;
use arbflow_config::{HealthSettings, topology};
use arbflow_domain::{
    AlertSeverity, CoordinatorEventKind, DegradationLevel, Heartbeat, ReportedState, ServiceRole,
    now_ms,
};

use crate::alerts::EventPublisher;
use crate::metrics;

/// A service the classifier expects to see heartbeating.
#[derive(Debug, Clone)]
pub struct MonitoredService {
    pub service_id: String,
    pub role: ServiceRole,
}

/// Throttles per-service stale warnings: warn on first detection, then only
/// when the idle age crosses doubling thresholds (30s -> 60s -> 120s -> ...).
#[derive(Debug, Clone, Copy)]
struct StaleWarnGate {
    next_at: Duration,
    initial: Duration,
}

impl StaleWarnGate {
    fn new(initial: Duration) -> Self {
        Self {
            next_at: initial,
            initial,
        }
    }

    /// True when this idle age warrants a warning; advances the gate.
    fn should_warn(&mut self, idle: Duration) -> bool {
        if idle >= self.next_at {
            while idle >= self.next_at {
                self.next_at *= 2;
            }
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.next_at = self.initial;
    }
}

/// Last known state of one observed service.
struct ServiceView {
    role: ServiceRole,
    last_beat: Option<Heartbeat>,
    warn_gate: StaleWarnGate,
}

/// What one evaluation saw, before hysteresis.
#[derive(Debug, Clone, Default)]
struct RegionObservation {
    total: usize,
    stale: Vec<String>,
    reporting_degraded: Vec<String>,
    starting: usize,
    critical_stale: bool,
    all_stale: bool,
    in_grace: bool,
}

/// Raw (pre-hysteresis) level for one observation.
///
/// "Majority stale" is a strict majority (stale * 2 > total): losing two of
/// three partitions is critical, losing one of two is not yet.
fn classify_raw(obs: &RegionObservation) -> DegradationLevel {
    if obs.total == 0 {
        return DegradationLevel::Normal;
    }
    if obs.all_stale && !obs.in_grace {
        return DegradationLevel::CompleteOutage;
    }
    if obs.critical_stale || obs.stale.len() * 2 > obs.total {
        return DegradationLevel::Critical;
    }
    if !obs.stale.is_empty() || !obs.reporting_degraded.is_empty() {
        return DegradationLevel::Partial;
    }
    DegradationLevel::Normal
}

/// Hysteresis gate over raw classifications: a transition (in either
/// direction) requires `hysteresis` consecutive evaluations reporting the
/// same new level.
pub struct DegradationClassifier {
    hysteresis: u32,
    current: DegradationLevel,
    candidate: DegradationLevel,
    streak: u32,
}

impl DegradationClassifier {
    pub fn new(hysteresis: u32) -> Self {
        Self {
            hysteresis: hysteresis.max(1),
            current: DegradationLevel::Normal,
            candidate: DegradationLevel::Normal,
            streak: 0,
        }
    }

    pub fn current(&self) -> DegradationLevel {
        self.current
    }

    /// Feed one evaluation; returns `Some((from, to))` on a confirmed
    /// transition.
    pub fn observe(&mut self, raw: DegradationLevel) -> Option<(DegradationLevel, DegradationLevel)> {
        if raw == self.current {
            // Back on the current level: any brewing transition is cancelled
            self.candidate = self.current;
            self.streak = 0;
            return None;
        }

        if raw == self.candidate {
            self.streak += 1;
        } else {
            self.candidate = raw;
            self.streak = 1;
        }

        if self.streak >= self.hysteresis {
            let from = self.current;
            self.current = raw;
            self.candidate = raw;
            self.streak = 0;
            return Some((from, raw));
        }
        None
    }
}

/// Detects pipeline starvation: detector counters advancing while executor
/// throughput stays flat across an evaluation window.
#[derive(Debug, Default)]
struct StarvationDetector {
    last_detector_total: Option<u64>,
    last_executor_total: Option<u64>,
    starving: bool,
}

impl StarvationDetector {
    /// Returns `Some(detector_messages)` on starvation onset.
    fn observe(&mut self, detector_total: u64, executor_total: u64, executor_seen: bool) -> Option<u64> {
        let detector_advanced = self
            .last_detector_total
            .is_some_and(|prev| detector_total > prev);
        let executor_advanced = self
            .last_executor_total
            .is_some_and(|prev| executor_total > prev);

        self.last_detector_total = Some(detector_total);
        self.last_executor_total = Some(executor_total);

        if !executor_seen {
            // Executor staleness is already a critical signal on its own
            return None;
        }

        if detector_advanced && !executor_advanced {
            if !self.starving {
                self.starving = true;
                return Some(detector_total);
            }
        } else if executor_advanced {
            self.starving = false;
        }
        None
    }

    fn is_starving(&self) -> bool {
        self.starving
    }
}

/// Active-only heartbeat observer + degradation classifier.
pub struct HealthMonitor {
    bus: StreamBus,
    events: EventPublisher,
    settings: HealthSettings,
    services: HashMap<String, ServiceView>,
    classifier: DegradationClassifier,
    starvation: StarvationDetector,
}

impl HealthMonitor {
    pub fn new(
        bus: StreamBus,
        events: EventPublisher,
        settings: HealthSettings,
        registered: &[MonitoredService],
    ) -> Self {
        let mut services = HashMap::new();
        for service in registered {
            services.insert(
                service.service_id.clone(),
                ServiceView {
                    role: service.role,
                    last_beat: None,
                    warn_gate: StaleWarnGate::new(settings.stale_threshold),
                },
            );
        }

        Self {
            bus,
            events,
            settings,
            services,
            classifier: DegradationClassifier::new(settings.hysteresis_count),
            starvation: StarvationDetector::default(),
        }
    }

    /// Evaluate until demotion/shutdown. `activated_at` anchors the startup
    /// grace window to this activation, not process start.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "[health] Monitor started ({} registered services, eval every {:?})",
            self.services.len(),
            self.settings.eval_interval
        );
        let activated_at = Instant::now();

        let mut ticker = tokio::time::interval(self.settings.eval_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate(activated_at).await;
                }
                _ = shutdown.recv() => {
                    info!("[health] Monitor stopping");
                    break;
                }
            }
        }
    }

    async fn evaluate(&mut self, activated_at: Instant) {
        let beats = match self
            .bus
            .read_recent(topology::SERVICE_HEARTBEATS, 512)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                // Frozen: keep the last level, re-enter hysteresis on recovery
                warn!("[health] Heartbeat read failed; classification frozen: {}", e);
                return;
            }
        };

        self.ingest_heartbeats(&beats);

        let in_grace = activated_at.elapsed() < self.settings.startup_grace;
        let obs = self.observe_region(in_grace);

        metrics::STALE_SERVICES.set(obs.stale.len() as i64);

        let mut raw = classify_raw(&obs);

        // Pipeline starvation: detectors producing, executor flat
        let (detector_total, executor_total, executor_seen) = self.throughput_totals();
        if let Some(detector_messages) = self
            .starvation
            .observe(detector_total, executor_total, executor_seen)
        {
            warn!(
                "[health] Pipeline starvation: detectors at {} messages, executor flat",
                detector_messages
            );
            if let Err(e) = self
                .events
                .publish(CoordinatorEventKind::PipelineStarvation { detector_messages })
                .await
            {
                warn!("[health] Failed to publish starvation event: {}", e);
            }
            self.events
                .alert(
                    AlertSeverity::Warning,
                    "pipeline starvation: detectors healthy but no execution throughput",
                )
                .await;
        }
        if self.starvation.is_starving() && raw < DegradationLevel::Partial {
            raw = DegradationLevel::Partial;
        }

        if let Some((from, to)) = self.classifier.observe(raw) {
            self.on_transition(from, to, &obs).await;
        }
        metrics::DEGRADATION_LEVEL.set(level_gauge(self.classifier.current()));
    }

    fn ingest_heartbeats(&mut self, entries: &[arbflow_common::RawEntry]) {
        // Newest-first tail: the first record per service wins
        let mut seen: HashMap<String, Heartbeat> = HashMap::new();
        for entry in entries {
            let Some(data) = entry.data() else { continue };
            let Ok(beat) = serde_json::from_str::<Heartbeat>(data) else {
                debug!("[health] Ignoring malformed heartbeat entry {}", entry.id);
                continue;
            };
            seen.entry(beat.service_id.clone()).or_insert(beat);
        }

        for (service_id, beat) in seen {
            match self.services.get_mut(&service_id) {
                Some(view) => {
                    // last_beat_at is monotone per service; ignore stragglers
                    let newer = view
                        .last_beat
                        .as_ref()
                        .is_none_or(|prev| beat.last_beat_at >= prev.last_beat_at);
                    if newer {
                        view.last_beat = Some(beat);
                    }
                }
                None => {
                    debug!(
                        "[health] Auto-registering observed service {} ({})",
                        service_id,
                        beat.role.as_str()
                    );
                    self.services.insert(
                        service_id,
                        ServiceView {
                            role: beat.role,
                            last_beat: Some(beat),
                            warn_gate: StaleWarnGate::new(self.settings.stale_threshold),
                        },
                    );
                }
            }
        }
    }

    fn observe_region(&mut self, in_grace: bool) -> RegionObservation {
        let now = now_ms();
        let stale_threshold_ms = self.settings.stale_threshold.as_millis() as i64;

        let mut obs = RegionObservation {
            total: self.services.len(),
            in_grace,
            ..Default::default()
        };
        let mut stale_or_starting = 0usize;

        for (service_id, view) in self.services.iter_mut() {
            match &view.last_beat {
                None => {
                    stale_or_starting += 1;
                    if in_grace {
                        obs.starting += 1;
                    } else {
                        obs.stale.push(service_id.clone());
                        if view.role.is_critical() {
                            obs.critical_stale = true;
                        }
                        if view.warn_gate.should_warn(self.settings.stale_threshold) {
                            warn!("[health] Service {} has never heartbeated", service_id);
                        }
                    }
                }
                Some(beat) => {
                    let idle_ms = (now - beat.last_beat_at).max(0);
                    if idle_ms > stale_threshold_ms {
                        stale_or_starting += 1;
                        obs.stale.push(service_id.clone());
                        if view.role.is_critical() {
                            obs.critical_stale = true;
                        }
                        let idle = Duration::from_millis(idle_ms as u64);
                        if view.warn_gate.should_warn(idle) {
                            warn!(
                                "[health] Service {} stale for {:?} (threshold {:?})",
                                service_id, idle, self.settings.stale_threshold
                            );
                        } else {
                            debug!("[health] Service {} still stale ({:?})", service_id, idle);
                        }
                    } else {
                        view.warn_gate.reset();
                        if matches!(
                            beat.reported_state,
                            ReportedState::Degraded | ReportedState::Failed
                        ) {
                            obs.reporting_degraded.push(service_id.clone());
                        }
                    }
                }
            }
        }

        // "All stale" counts never-seen services too, but grace suppresses
        // the outage verdict downstream
        obs.all_stale = obs.total > 0 && stale_or_starting == obs.total && obs.starting == 0;
        obs
    }

    fn throughput_totals(&self) -> (u64, u64, bool) {
        let mut detector_total = 0u64;
        let mut executor_total = 0u64;
        let mut executor_seen = false;

        for view in self.services.values() {
            let Some(beat) = &view.last_beat else { continue };
            match view.role {
                ServiceRole::Detector | ServiceRole::Partition => {
                    detector_total += beat.counters.messages_processed_total;
                }
                ServiceRole::Executor => {
                    executor_seen = true;
                    executor_total += beat.counters.messages_processed_total;
                }
                ServiceRole::Coordinator => {}
            }
        }
        (detector_total, executor_total, executor_seen)
    }

    async fn on_transition(
        &mut self,
        from: DegradationLevel,
        to: DegradationLevel,
        obs: &RegionObservation,
    ) {
        info!("[health] Degradation level {} -> {}", from, to);

        if let Err(e) = self
            .events
            .publish(CoordinatorEventKind::DegradationChanged {
                from,
                to,
                stale_services: obs.stale.clone(),
            })
            .await
        {
            warn!("[health] Failed to publish degradation event: {}", e);
        }

        let severity = match to {
            DegradationLevel::Normal => AlertSeverity::Info,
            DegradationLevel::Partial => AlertSeverity::Warning,
            DegradationLevel::Critical | DegradationLevel::CompleteOutage => {
                AlertSeverity::Critical
            }
        };
        let message = format!(
            "degradation level changed {from} -> {to} (stale: {})",
            if obs.stale.is_empty() {
                "none".to_string()
            } else {
                obs.stale.join(", ")
            }
        );
        self.events.alert(severity, &message).await;
    }
}

fn level_gauge(level: DegradationLevel) -> i64 {
    match level {
        DegradationLevel::Normal => 0,
        DegradationLevel::Partial => 1,
        DegradationLevel::Critical => 2,
        DegradationLevel::CompleteOutage => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(total: usize, stale: &[&str]) -> RegionObservation {
        RegionObservation {
            total,
            stale: stale.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_all_fresh() {
        assert_eq!(classify_raw(&obs(3, &[])), DegradationLevel::Normal);
    }

    #[test]
    fn test_classify_minority_stale_is_partial() {
        assert_eq!(classify_raw(&obs(3, &["a"])), DegradationLevel::Partial);
        assert_eq!(classify_raw(&obs(4, &["a", "b"])), DegradationLevel::Partial);
    }

    #[test]
    fn test_classify_majority_stale_is_critical() {
        // Two of three partitions down: strict majority
        assert_eq!(classify_raw(&obs(3, &["a", "b"])), DegradationLevel::Critical);
        assert_eq!(
            classify_raw(&obs(5, &["a", "b", "c"])),
            DegradationLevel::Critical
        );
    }

    #[test]
    fn test_classify_critical_role_stale_is_critical() {
        let mut observation = obs(5, &["executor-1"]);
        observation.critical_stale = true;
        assert_eq!(classify_raw(&observation), DegradationLevel::Critical);
    }

    #[test]
    fn test_classify_degraded_report_is_partial() {
        let mut observation = obs(3, &[]);
        observation.reporting_degraded = vec!["partition-eu".into()];
        assert_eq!(classify_raw(&observation), DegradationLevel::Partial);
    }

    #[test]
    fn test_classify_all_stale_is_outage_unless_grace() {
        let mut observation = obs(3, &["a", "b", "c"]);
        observation.all_stale = true;
        assert_eq!(classify_raw(&observation), DegradationLevel::CompleteOutage);

        observation.in_grace = true;
        // Grace suppresses the outage verdict; majority rule still applies
        assert_eq!(classify_raw(&observation), DegradationLevel::Critical);
    }

    #[test]
    fn test_hysteresis_requires_consecutive_observations() {
        let mut classifier = DegradationClassifier::new(3);

        assert!(classifier.observe(DegradationLevel::Critical).is_none());
        assert!(classifier.observe(DegradationLevel::Critical).is_none());
        let transition = classifier.observe(DegradationLevel::Critical);
        assert_eq!(
            transition,
            Some((DegradationLevel::Normal, DegradationLevel::Critical))
        );
        assert_eq!(classifier.current(), DegradationLevel::Critical);
    }

    #[test]
    fn test_hysteresis_flap_suppression() {
        let mut classifier = DegradationClassifier::new(3);

        assert!(classifier.observe(DegradationLevel::Partial).is_none());
        assert!(classifier.observe(DegradationLevel::Partial).is_none());
        // A clean evaluation resets the streak
        assert!(classifier.observe(DegradationLevel::Normal).is_none());
        assert!(classifier.observe(DegradationLevel::Partial).is_none());
        assert!(classifier.observe(DegradationLevel::Partial).is_none());
        assert_eq!(classifier.current(), DegradationLevel::Normal);
    }

    #[test]
    fn test_hysteresis_applies_on_recovery_too() {
        let mut classifier = DegradationClassifier::new(2);

        classifier.observe(DegradationLevel::Critical);
        assert_eq!(
            classifier.observe(DegradationLevel::Critical),
            Some((DegradationLevel::Normal, DegradationLevel::Critical))
        );

        assert!(classifier.observe(DegradationLevel::Normal).is_none());
        assert_eq!(
            classifier.observe(DegradationLevel::Normal),
            Some((DegradationLevel::Critical, DegradationLevel::Normal))
        );
    }

    #[test]
    fn test_stale_warn_gate_doubles() {
        let mut gate = StaleWarnGate::new(Duration::from_secs(30));

        assert!(!gate.should_warn(Duration::from_secs(29)));
        assert!(gate.should_warn(Duration::from_secs(31)));
        // Next threshold is 60s
        assert!(!gate.should_warn(Duration::from_secs(45)));
        assert!(gate.should_warn(Duration::from_secs(61)));
        // Then 120s
        assert!(!gate.should_warn(Duration::from_secs(100)));
        assert!(gate.should_warn(Duration::from_secs(121)));

        gate.reset();
        assert!(gate.should_warn(Duration::from_secs(31)));
    }

    #[test]
    fn test_stale_warn_gate_skips_crossed_thresholds() {
        let mut gate = StaleWarnGate::new(Duration::from_secs(30));
        // Idle age jumped straight past 30s and 60s
        assert!(gate.should_warn(Duration::from_secs(70)));
        // Next warn only at 120s
        assert!(!gate.should_warn(Duration::from_secs(119)));
        assert!(gate.should_warn(Duration::from_secs(120)));
    }

    #[test]
    fn test_starvation_onset_and_recovery() {
        let mut detector = StarvationDetector::default();

        // First observation establishes the baseline
        assert!(detector.observe(100, 50, true).is_none());
        // Detectors advance, executor flat -> onset
        assert_eq!(detector.observe(110, 50, true), Some(110));
        assert!(detector.is_starving());
        // Still starving: no repeated onset signal
        assert!(detector.observe(120, 50, true).is_none());
        // Executor throughput resumes -> recovered
        assert!(detector.observe(130, 55, true).is_none());
        assert!(!detector.is_starving());
    }

    #[test]
    fn test_starvation_ignored_without_executor() {
        let mut detector = StarvationDetector::default();
        assert!(detector.observe(100, 0, false).is_none());
        assert!(detector.observe(200, 0, false).is_none());
        assert!(!detector.is_starving());
    }
}
