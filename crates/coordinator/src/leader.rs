/*!
 * Leader Election
 *
 * One active coordinator per region, fenced by a single Redis lease key:
 *
 * ```text
 * standby ── SET leader:{region} NX PX ttl ──▶ active
 *    ▲                                           │
 *    │              compare-and-set renew        │ every ttl/3
 *    │                                           ▼
 *    └──── CAS failed / renewal slow ──── demoted (hook fires)
 * ```
 *
 * The lease TTL is the sole fencing mechanism. Brief overlap between a
 * stale active and a fresh one is tolerated: forwarding is idempotent and
 * duplicates are absorbed by the executor's per-opportunity lock.
 *
 * A renewal round-trip slower than ttl/2 demotes preemptively: after that
 * long we cannot assume the lease is still ours.
 */

use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use arbflow_common::LockManager;
use arbflow_config::{LeaderSettings, topology};
use arbflow_domain::CoordinatorEventKind;

use crate::alerts::EventPublisher;
use crate::metrics;

/// This instance's view of its own leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Standby,
    Active,
}

/// Runs the acquire/renew/release protocol and broadcasts state changes.
pub struct LeaderElector {
    locks: LockManager,
    events: EventPublisher,
    key: String,
    settings: LeaderSettings,
    state_tx: watch::Sender<LeaderState>,
    renewal_count: u64,
}

impl LeaderElector {
    pub fn new(
        locks: LockManager,
        events: EventPublisher,
        region: &str,
        settings: LeaderSettings,
    ) -> (Self, watch::Receiver<LeaderState>) {
        let (state_tx, state_rx) = watch::channel(LeaderState::Standby);
        (
            Self {
                locks,
                events,
                key: topology::leader_key(region),
                settings,
                state_tx,
                renewal_count: 0,
            },
            state_rx,
        )
    }

    /// Drive the election until shutdown. On graceful shutdown the lease is
    /// deleted only if still ours, so a successor's lease is never stolen.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Leader elector started (key: {})", self.key);

        loop {
            // Standby: poll for the lease
            match self.try_acquire().await {
                Ok(true) => {
                    self.activate().await;
                    let demoted_gracefully = self.renew_until_lost(&mut shutdown).await;
                    if demoted_gracefully {
                        // Shutdown requested while active
                        break;
                    }
                    // Lost the lease: back to standby polling
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Lease acquisition attempt failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.retry_interval) => {}
                _ = shutdown.recv() => {
                    info!("Leader elector stopping (standby)");
                    break;
                }
            }
        }
    }

    async fn try_acquire(&mut self) -> arbflow_common::Result<bool> {
        self.locks.acquire(&self.key, self.settings.lease_ttl).await
    }

    async fn activate(&mut self) {
        self.renewal_count = 0;
        info!(
            "👑 Acquired leader lease {} (instance: {})",
            self.key,
            self.locks.owner()
        );
        metrics::IS_LEADER.set(1);
        metrics::LEADER_TRANSITIONS_TOTAL
            .with_label_values(&["elected"])
            .inc();

        if let Err(e) = self.events.publish(CoordinatorEventKind::LeaderElected).await {
            warn!("Failed to publish leader-elected event: {}", e);
        }

        let _ = self.state_tx.send(LeaderState::Active);
    }

    async fn demote(&mut self, reason: &str) {
        warn!(
            "Demoting to standby after {} renewals: {}",
            self.renewal_count, reason
        );
        metrics::IS_LEADER.set(0);
        metrics::LEADER_TRANSITIONS_TOTAL
            .with_label_values(&["demoted"])
            .inc();

        // Demotion hook: active-only subsystems watch this channel and stop
        let _ = self.state_tx.send(LeaderState::Standby);

        if let Err(e) = self
            .events
            .publish(CoordinatorEventKind::LeaderDemoted {
                reason: reason.to_string(),
            })
            .await
        {
            warn!("Failed to publish leader-demoted event: {}", e);
        }
    }

    /// Renew while active. Returns `true` when shutdown was requested
    /// (graceful release done), `false` on lease loss.
    async fn renew_until_lost(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let mut ticker = tokio::time::interval(self.settings.renew_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so renewal starts one
        // interval after acquisition.
        ticker.tick().await;

        // A renewal slower than ttl/2 leaves too little margin to trust
        let renew_deadline = self.settings.lease_ttl / 2;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let renewal = tokio::time::timeout(
                        renew_deadline,
                        self.locks.renew(&self.key, self.settings.lease_ttl),
                    )
                    .await;

                    match renewal {
                        Ok(Ok(true)) => {
                            self.renewal_count += 1;
                        }
                        Ok(Ok(false)) => {
                            self.demote("lease no longer ours (compare-and-set failed)").await;
                            return false;
                        }
                        Ok(Err(e)) => {
                            self.demote(&format!("lease renewal failed: {e}")).await;
                            return false;
                        }
                        Err(_) => {
                            self.demote("lease renewal exceeded half the lease TTL").await;
                            return false;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Leader elector stopping (active); releasing lease");
                    let _ = self.state_tx.send(LeaderState::Standby);
                    metrics::IS_LEADER.set(0);
                    match self.locks.release(&self.key).await {
                        Ok(true) => info!("Leader lease released"),
                        Ok(false) => info!("Leader lease already expired or taken over"),
                        Err(e) => error!("Failed to release leader lease: {}", e),
                    }
                    return true;
                }
            }
        }
    }
}
