/*!
 * Heartbeat Publisher
 *
 * Every service spawns one of these: a task that publishes a liveness
 * record to `stream:service-heartbeats` at a fixed cadence (default 5 s).
 * The record carries the service's self-reported state and monotone
 * counters, which the active coordinator's health monitor folds into the
 * regional degradation level.
 *
 * The publisher is best-effort: a failed publish is logged and skipped, the
 * next tick retries. It uses the short retry policy so a substrate outage
 * costs it one tick, never minutes.
 */

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use arbflow_domain::{Heartbeat, ReportedState, ServiceCounters, ServiceRole, now_ms};

use crate::streams::StreamBus;

/// Shared counters a service increments on its hot paths; snapshotted into
/// each heartbeat.
#[derive(Debug, Default)]
pub struct HeartbeatCounters {
    messages_processed: AtomicU64,
    errors: AtomicU64,
    queue_depth: AtomicU64,
    state: AtomicU8,
}

impl HeartbeatCounters {
    pub fn new() -> Arc<Self> {
        let counters = Self::default();
        counters.state.store(state_to_u8(ReportedState::Starting), Ordering::Relaxed);
        Arc::new(counters)
    }

    pub fn incr_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: ReportedState) {
        self.state.store(state_to_u8(state), Ordering::Relaxed);
    }

    pub fn state(&self) -> ReportedState {
        u8_to_state(self.state.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> ServiceCounters {
        ServiceCounters {
            messages_processed_total: self.messages_processed.load(Ordering::Relaxed),
            errors_total: self.errors.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

fn state_to_u8(state: ReportedState) -> u8 {
    match state {
        ReportedState::Starting => 0,
        ReportedState::Healthy => 1,
        ReportedState::Degraded => 2,
        ReportedState::Failed => 3,
    }
}

fn u8_to_state(raw: u8) -> ReportedState {
    match raw {
        0 => ReportedState::Starting,
        1 => ReportedState::Healthy,
        2 => ReportedState::Degraded,
        _ => ReportedState::Failed,
    }
}

/// Publishes one service's heartbeats until shutdown.
pub struct HeartbeatPublisher {
    bus: StreamBus,
    stream: String,
    service_id: String,
    role: ServiceRole,
    counters: Arc<HeartbeatCounters>,
    interval: Duration,
    max_len: usize,
}

impl HeartbeatPublisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: StreamBus,
        stream: &str,
        service_id: &str,
        role: ServiceRole,
        counters: Arc<HeartbeatCounters>,
        interval: Duration,
        max_len: usize,
    ) -> Self {
        Self {
            bus,
            stream: stream.to_string(),
            service_id: service_id.to_string(),
            role,
            counters,
            interval,
            max_len,
        }
    }

    fn record(&self) -> Heartbeat {
        Heartbeat {
            service_id: self.service_id.clone(),
            role: self.role,
            last_beat_at: now_ms(),
            reported_state: self.counters.state(),
            counters: self.counters.snapshot(),
        }
    }

    /// Beat until the shutdown signal. One final beat is attempted on the
    /// way out so observers see the terminal state quickly.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "[{}] Heartbeat publisher started ({:?} cadence)",
            self.service_id, self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.beat().await;
                }
                _ = shutdown.recv() => {
                    debug!("[{}] Heartbeat publisher stopping", self.service_id);
                    self.beat().await;
                    break;
                }
            }
        }
    }

    async fn beat(&mut self) {
        let record = self.record();
        if let Err(e) = publish_heartbeat(&mut self.bus, &self.stream, &record, self.max_len).await
        {
            warn!(
                "[{}] Heartbeat publish failed (next tick retries): {}",
                self.service_id, e
            );
        }
    }
}

async fn publish_heartbeat<T: Serialize>(
    bus: &mut StreamBus,
    stream: &str,
    record: &T,
    max_len: usize,
) -> crate::error::Result<String> {
    bus.publish(stream, record, max_len).await
}
