/*!
 * Execution Dispatcher
 *
 * Consumer-group reader on `stream:execution-requests` feeding a bounded
 * worker pool. Per entry:
 *
 * ```text
 * read ──▶ dedup check ──▶ locking ──▶ executing ──▶ publishing ──▶ releasing ──▶ ack
 *              │               │
 *              │               └─ lock busy ──▶ duplicate-ack (no result)
 *              └─ completed here before ──▶ one lock-conflict result, then ack
 * ```
 *
 * **Deferred acknowledgement is load-bearing**: the source entry is XACK'd
 * only after its result is durably published. A crash anywhere in between
 * redelivers the entry; the per-opportunity lock TTL (60 s) bounds how long
 * a half-done id stays untouchable.
 *
 * **Backpressure**: the read loop must hold a worker permit before it reads,
 * so at most `maxInFlight` entries are ever in worker-execution state and
 * the stream backlog stays in Redis, not in memory.
 *
 * The `Reclaimer` sweeps the pending-entry list for work stranded by
 * crashed consumers: entries idle past the lock TTL are claimed and re-run;
 * entries that keep failing delivery go to `stream:execution-dlq`.
 */

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, error, info, warn};
use validator::Validate;

use arbflow_common::{HeartbeatCounters, LockManager, RawEntry, StreamBus};
use arbflow_config::{ExecutorSettings, ReaderSettings, StreamCaps, topology};
use arbflow_domain::{ExecutionErrorKind, ExecutionRequest, ExecutionResult, now_ms};

use crate::context::StrategyContext;
use crate::dedup::{RecentIds, SeenState};
use crate::metrics;
use crate::strategy::StrategyRegistry;

/// Everything a worker needs beyond its connections.
pub struct WorkerShared {
    pub registry: StrategyRegistry,
    pub context: StrategyContext,
    pub dedup: RecentIds,
    pub counters: Arc<HeartbeatCounters>,
    pub caps: StreamCaps,
    pub settings: ExecutorSettings,
    pub instance_id: String,
}

/// The read loop. Owns a dedicated blocking-read connection; workers get
/// clones of the non-blocking side connection.
pub struct ExecutionDispatcher {
    read_bus: StreamBus,
    side_bus: StreamBus,
    locks: LockManager,
    shared: Arc<WorkerShared>,
    reader: ReaderSettings,
    pool: Arc<Semaphore>,
}

impl ExecutionDispatcher {
    pub fn new(
        read_bus: StreamBus,
        side_bus: StreamBus,
        locks: LockManager,
        shared: Arc<WorkerShared>,
        reader: ReaderSettings,
        pool: Arc<Semaphore>,
    ) -> Self {
        Self {
            read_bus,
            side_bus,
            locks,
            shared,
            reader,
            pool,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "[dispatcher] Starting (consumer: {}, pool: {})",
            self.shared.instance_id, self.shared.settings.max_in_flight
        );

        if let Err(e) = self
            .read_bus
            .ensure_group(topology::EXECUTION_REQUESTS, topology::EXECUTION_GROUP)
            .await
        {
            error!("[dispatcher] Failed to ensure consumer group: {}", e);
            return;
        }

        self.drain_own_backlog().await;

        loop {
            // Backpressure point: no permit, no read
            let permit = tokio::select! {
                permit = self.pool.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => {
                    info!("[dispatcher] Shutdown signal received");
                    break;
                }
            };

            // Never read more than the pool can hold right now
            let budget = self.pool.available_permits() + 1;
            let count = self.reader.batch_size.min(budget);

            let entries = match self
                .read_bus
                .read_group(
                    topology::EXECUTION_REQUESTS,
                    topology::EXECUTION_GROUP,
                    &self.shared.instance_id,
                    count,
                    self.reader.block,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    drop(permit);
                    error!("[dispatcher] Read failed: {}. Retrying in 1s...", e);
                    self.shared.counters.incr_errors();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if entries.is_empty() {
                drop(permit);
                continue;
            }

            let mut held = Some(permit);
            for entry in entries {
                let permit = match held.take() {
                    Some(permit) => permit,
                    None => match self.pool.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                self.spawn_worker(entry, permit);
            }
        }

        info!("[dispatcher] Stopped");
    }

    /// Re-process entries delivered to this consumer before a restart but
    /// never acknowledged (the consumer's own PEL).
    async fn drain_own_backlog(&mut self) {
        loop {
            let backlog = match self
                .read_bus
                .read_own_pending(
                    topology::EXECUTION_REQUESTS,
                    topology::EXECUTION_GROUP,
                    &self.shared.instance_id,
                    self.reader.batch_size,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("[dispatcher] Backlog drain failed: {}", e);
                    return;
                }
            };

            if backlog.is_empty() {
                return;
            }
            info!("[dispatcher] Draining {} own pending entries", backlog.len());

            for entry in backlog {
                match self.pool.clone().acquire_owned().await {
                    Ok(permit) => self.spawn_worker(entry, permit),
                    Err(_) => return,
                }
            }
        }
    }

    fn spawn_worker(&self, entry: RawEntry, permit: tokio::sync::OwnedSemaphorePermit) {
        let shared = Arc::clone(&self.shared);
        let mut bus = self.side_bus.clone();
        let mut locks = self.locks.clone();
        let in_flight = self.shared.settings.max_in_flight - self.pool.available_permits();
        self.shared.counters.set_queue_depth(in_flight as u64);

        tokio::spawn(async move {
            metrics::IN_FLIGHT.inc();
            process_entry(&shared, &mut bus, &mut locks, &entry).await;
            metrics::IN_FLIGHT.dec();
            drop(permit);
        });
    }
}

/// Full per-entry lifecycle. Public so the test harness can drive single
/// entries without a read loop.
pub async fn process_entry(
    shared: &WorkerShared,
    bus: &mut StreamBus,
    locks: &mut LockManager,
    entry: &RawEntry,
) {
    let started = Instant::now();
    metrics::REQUESTS_CONSUMED_TOTAL.inc();

    // Invalid request policy: the forwarder filters these; anything that
    // still arrives malformed is acked away, never DLQ'd from here.
    let Some(data) = entry.data() else {
        debug!("[worker] Entry {} has no data field; acking", entry.id);
        ack_entry(bus, &entry.id).await;
        return;
    };
    let request: ExecutionRequest = match serde_json::from_str(data) {
        Ok(request) => request,
        Err(e) => {
            debug!("[worker] Entry {} undecodable ({}); acking", entry.id, e);
            ack_entry(bus, &entry.id).await;
            return;
        }
    };
    let opportunity = &request.opportunity;
    let id = request.id().to_string();
    if id.is_empty() {
        ack_entry(bus, &entry.id).await;
        return;
    }
    // Secondary validation gate; the forwarder already filtered, but
    // entries can be injected onto this stream directly
    if let Err(e) = opportunity.validate() {
        debug!("[worker] Entry {} failed validation ({}); acking", entry.id, e);
        ack_entry(bus, &entry.id).await;
        return;
    }

    // Redelivery of an id this process already completed: never re-execute.
    // The first such duplicate gets the one allowed lock-conflict result.
    match shared.dedup.seen_state(&id) {
        SeenState::CompletedUnreported => {
            let result = ExecutionResult::failure(
                opportunity,
                ExecutionErrorKind::LockConflict,
                "duplicate redelivery of a completed opportunity",
            );
            if publish_result(bus, shared, &result).await {
                shared.dedup.mark_reported(&id);
            }
            metrics::DUPLICATES_TOTAL
                .with_label_values(&["conflict-reported"])
                .inc();
            ack_entry(bus, &entry.id).await;
            return;
        }
        SeenState::CompletedReported => {
            metrics::DUPLICATES_TOTAL
                .with_label_values(&["silent-ack"])
                .inc();
            ack_entry(bus, &entry.id).await;
            return;
        }
        SeenState::Fresh => {}
    }

    // Per-opportunity distributed lock
    let lock_key = topology::opportunity_lock_key(&id);
    match locks.acquire(&lock_key, shared.settings.lock_ttl).await {
        Ok(true) => {}
        Ok(false) => {
            // Contention with another instance (or an unexpired crash
            // leftover): the winner publishes, we just ack
            debug!("[worker] Lock busy for {}; acking duplicate", id);
            metrics::DUPLICATES_TOTAL
                .with_label_values(&["contention"])
                .inc();
            ack_entry(bus, &entry.id).await;
            return;
        }
        Err(e) => {
            // Substrate trouble: leave the entry pending for redelivery
            warn!("[worker] Lock acquire for {} failed: {}", id, e);
            shared.counters.incr_errors();
            return;
        }
    }

    // Re-check under the lock: a concurrent worker for the same id may have
    // completed and released between our first check and this acquire
    match shared.dedup.seen_state(&id) {
        SeenState::Fresh => {}
        state => {
            if state == SeenState::CompletedUnreported {
                let result = ExecutionResult::failure(
                    opportunity,
                    ExecutionErrorKind::LockConflict,
                    "duplicate redelivery of a completed opportunity",
                );
                if publish_result(bus, shared, &result).await {
                    shared.dedup.mark_reported(&id);
                }
            }
            metrics::DUPLICATES_TOTAL
                .with_label_values(&["conflict-under-lock"])
                .inc();
            if let Err(e) = locks.release(&lock_key).await {
                warn!("[worker] Lock release for {} failed (TTL will clean up): {}", id, e);
            }
            ack_entry(bus, &entry.id).await;
            return;
        }
    }

    // Execute (deadline gate, strategy resolution, panic isolation)
    let result = execute_request(shared, &request).await;
    let outcome = outcome_label(&result);

    // Deferred ack: publish, release, only then ack
    if publish_result(bus, shared, &result).await {
        shared.dedup.mark_completed(&id);
        shared.counters.incr_processed();
        metrics::EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();

        if let Err(e) = locks.release(&lock_key).await {
            warn!("[worker] Lock release for {} failed (TTL will clean up): {}", id, e);
        }
        ack_entry(bus, &entry.id).await;
    } else {
        // Result could not be published: keep the lock (TTL bounds it) and
        // leave the entry pending. Redelivery after lock expiry retries.
        shared.counters.incr_errors();
        metrics::EXECUTIONS_TOTAL
            .with_label_values(&["substrate-unavailable"])
            .inc();
    }

    metrics::EXECUTION_DURATION
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
}

async fn execute_request(shared: &WorkerShared, request: &ExecutionRequest) -> ExecutionResult {
    let opportunity = &request.opportunity;

    if opportunity.is_expired_at(now_ms()) {
        return ExecutionResult::failure(
            opportunity,
            ExecutionErrorKind::Timeout,
            "deadline passed before dispatch",
        );
    }

    let Some(strategy) = shared.registry.resolve(opportunity) else {
        return ExecutionResult::failure(
            opportunity,
            ExecutionErrorKind::NoStrategy,
            format!(
                "no strategy for type {} on chain {}",
                opportunity.kind, opportunity.chain
            ),
        );
    };
    debug!(
        "[worker] Dispatching {} via {} strategy",
        opportunity.id,
        strategy.name()
    );

    // Nothing escapes the strategy boundary, panics included
    match AssertUnwindSafe(strategy.execute(opportunity, &shared.context))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => {
            error!("[worker] Strategy {} panicked on {}", strategy.name(), opportunity.id);
            ExecutionResult::failure(
                opportunity,
                ExecutionErrorKind::Unknown,
                format!("strategy {} panicked", strategy.name()),
            )
        }
    }
}

async fn publish_result(bus: &mut StreamBus, shared: &WorkerShared, result: &ExecutionResult) -> bool {
    match bus
        .publish(
            topology::EXECUTION_RESULTS,
            result,
            shared.caps.execution_results,
        )
        .await
    {
        Ok(_) => {
            metrics::RESULTS_PUBLISHED_TOTAL.inc();
            true
        }
        Err(e) => {
            warn!(
                "[worker] Result publish for {} failed: {}",
                result.opportunity_id, e
            );
            false
        }
    }
}

async fn ack_entry(bus: &mut StreamBus, entry_id: &str) {
    if let Err(e) = bus
        .ack(
            topology::EXECUTION_REQUESTS,
            topology::EXECUTION_GROUP,
            &[entry_id.to_string()],
        )
        .await
    {
        // Redelivery is absorbed by the dedup cache / lock
        warn!("[worker] Ack for {} failed: {}", entry_id, e);
    }
}

fn outcome_label(result: &ExecutionResult) -> &'static str {
    match (&result.error, result.success) {
        (_, true) => "success",
        (Some(kind), false) => kind.as_str(),
        (None, false) => "unknown",
    }
}

/// Sweeps the group's pending-entry list for stranded work.
pub struct Reclaimer {
    bus: StreamBus,
    locks: LockManager,
    shared: Arc<WorkerShared>,
    pool: Arc<Semaphore>,
}

impl Reclaimer {
    pub fn new(
        bus: StreamBus,
        locks: LockManager,
        shared: Arc<WorkerShared>,
        pool: Arc<Semaphore>,
    ) -> Self {
        Self {
            bus,
            locks,
            shared,
            pool,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        // Sweep twice per lock TTL: fast enough that recovery adds at most
        // half a TTL on top of the lock expiry itself
        let sweep = (self.shared.settings.lock_ttl / 2).max(Duration::from_secs(1));
        info!("[reclaimer] Starting (sweep every {:?})", sweep);

        let mut ticker = tokio::time::interval(sweep);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => {
                    info!("[reclaimer] Stopping");
                    break;
                }
            }
        }
    }

    async fn sweep(&mut self) {
        // Only entries idle past the lock TTL are up for grabs: their
        // original consumer is dead or wedged, and any lock it held has
        // expired with it
        let min_idle = self.shared.settings.lock_ttl;
        let candidates = match self
            .bus
            .pending_entries(topology::EXECUTION_REQUESTS, topology::EXECUTION_GROUP, min_idle, 100)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("[reclaimer] Pending inspection failed: {}", e);
                return;
            }
        };
        if candidates.is_empty() {
            return;
        }

        let delivery_counts: HashMap<String, u64> = candidates
            .iter()
            .map(|c| (c.entry_id.clone(), c.delivery_count))
            .collect();
        let ids: Vec<String> = candidates.into_iter().map(|c| c.entry_id).collect();

        let claimed = match self
            .bus
            .claim(
                topology::EXECUTION_REQUESTS,
                topology::EXECUTION_GROUP,
                &self.shared.instance_id,
                min_idle,
                &ids,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!("[reclaimer] Claim failed: {}", e);
                return;
            }
        };

        for entry in claimed {
            metrics::RECLAIMED_TOTAL.inc();
            let deliveries = delivery_counts.get(&entry.id).copied().unwrap_or(0);

            if deliveries > self.shared.settings.max_delivery_attempts {
                // Poison: it has had its chances
                warn!(
                    "[reclaimer] Entry {} exceeded {} deliveries; dead-lettering",
                    entry.id, self.shared.settings.max_delivery_attempts
                );
                metrics::EXECUTION_DLQ_TOTAL.inc();
                self.shared.counters.incr_errors();
                if let Err(e) = self
                    .bus
                    .move_to_dlq(
                        topology::EXECUTION_REQUESTS,
                        topology::EXECUTION_GROUP,
                        &entry,
                        topology::EXECUTION_DLQ,
                        "max-deliveries-exceeded",
                        self.shared.caps.execution_dlq,
                    )
                    .await
                {
                    warn!("[reclaimer] DLQ routing for {} failed: {}", entry.id, e);
                }
                continue;
            }

            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let shared = Arc::clone(&self.shared);
            let mut bus = self.bus.clone();
            let mut locks = self.locks.clone();
            tokio::spawn(async move {
                metrics::IN_FLIGHT.inc();
                process_entry(&shared, &mut bus, &mut locks, &entry).await;
                metrics::IN_FLIGHT.dec();
                drop(permit);
            });
        }
    }
}
