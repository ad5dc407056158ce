/*!
 * Opportunity Forwarder
 *
 * Active-leader-only loop that moves entries from `stream:opportunities` to
 * `stream:execution-requests`:
 *
 * ```text
 * 1. XREADGROUP coordinator-group (batch 10, block 100ms)
 * 2. For each entry:
 *    ├─> parse `data` as JSON      ── fail ──▶ forwarding-dlq (malformed-json)
 *    ├─> require `id`              ── fail ──▶ forwarding-dlq (missing-id)
 *    ├─> typed + validated parse   ── fail ──▶ forwarding-dlq (schema-invalid)
 *    ├─> enrich (forwardedBy/At, coordinatorAt)
 *    └─> XADD execution-requests (MAXLEN ~5000)
 * 3. XACK forwarded entries
 * ```
 *
 * A crash between XADD and XACK re-delivers the source entry, so a
 * duplicate execution request can appear downstream; the executor's
 * per-opportunity lock absorbs it. On substrate loss the entry is left
 * un-acked on purpose: redelivery *is* the retry.
 *
 * No self-throttling: if the execution stream saturates, the MAXLEN cap
 * evicts the oldest entries. Stale opportunities are worthless anyway.
 */

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use validator::Validate;

use arbflow_common::{HeartbeatCounters, RawEntry, StreamBus};
use arbflow_config::{ReaderSettings, StreamCaps, topology};
use arbflow_domain::{ExecutionRequest, Opportunity, now_ms};

use crate::metrics;

/// DLQ routing reasons for unroutable opportunity entries.
const REASON_MALFORMED_JSON: &str = "malformed-json";
const REASON_MISSING_ID: &str = "missing-id";
const REASON_SCHEMA_INVALID: &str = "schema-invalid";

enum Routed {
    /// Forward succeeded; ack the source id
    Forwarded(String),
    /// Already acked as part of DLQ routing
    DeadLettered,
    /// Substrate lost mid-forward; leave un-acked for redelivery
    LeftPending,
}

/// Leader-only forwarding loop. Owns its own substrate connection because
/// blocking group reads park the connection.
pub struct Forwarder {
    bus: StreamBus,
    instance_id: String,
    reader: ReaderSettings,
    caps: StreamCaps,
    counters: Arc<HeartbeatCounters>,
}

impl Forwarder {
    pub fn new(
        bus: StreamBus,
        instance_id: &str,
        reader: ReaderSettings,
        caps: StreamCaps,
        counters: Arc<HeartbeatCounters>,
    ) -> Self {
        Self {
            bus,
            instance_id: instance_id.to_string(),
            reader,
            caps,
            counters,
        }
    }

    /// Consume, enrich, forward, ack — until the demotion/shutdown signal.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("[forwarder] Starting (consumer: {})", self.instance_id);

        if let Err(e) = self
            .bus
            .ensure_group(topology::OPPORTUNITIES, topology::COORDINATOR_GROUP)
            .await
        {
            error!("[forwarder] Failed to ensure consumer group: {}", e);
            return;
        }

        loop {
            if shutdown.try_recv().is_ok() {
                info!("[forwarder] Shutdown signal received");
                break;
            }

            let entries = match self
                .bus
                .read_group(
                    topology::OPPORTUNITIES,
                    topology::COORDINATOR_GROUP,
                    &self.instance_id,
                    self.reader.batch_size,
                    self.reader.block,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    error!("[forwarder] Read failed: {}. Retrying in 1s...", e);
                    self.counters.incr_errors();
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            if entries.is_empty() {
                continue;
            }

            let mut ack_ids = Vec::with_capacity(entries.len());
            for entry in &entries {
                match self.route(entry).await {
                    Routed::Forwarded(id) => {
                        ack_ids.push(id);
                        self.counters.incr_processed();
                        metrics::OPPORTUNITIES_FORWARDED_TOTAL.inc();
                    }
                    Routed::DeadLettered => {
                        self.counters.incr_errors();
                    }
                    Routed::LeftPending => {
                        // Degradation signal: the substrate dropped out from
                        // under us. Ack what we have and let the rest redeliver.
                        self.counters.incr_errors();
                        metrics::FORWARD_ERRORS_TOTAL.inc();
                        break;
                    }
                }
            }

            if let Err(e) = self
                .bus
                .ack(topology::OPPORTUNITIES, topology::COORDINATOR_GROUP, &ack_ids)
                .await
            {
                error!(
                    "[forwarder] Failed to ack {} entries: {}. They may be reprocessed.",
                    ack_ids.len(),
                    e
                );
            }
        }

        info!("[forwarder] Stopped");
    }

    async fn route(&mut self, entry: &RawEntry) -> Routed {
        // (a) The entry must carry JSON in `data`
        let parsed: serde_json::Value = match entry.data().map(serde_json::from_str) {
            Some(Ok(value)) => value,
            _ => return self.dead_letter(entry, REASON_MALFORMED_JSON).await,
        };

        // (b) The record must carry a non-empty id
        let has_id = parsed
            .get("id")
            .and_then(|v| v.as_str())
            .is_some_and(|id| !id.is_empty());
        if !has_id {
            return self.dead_letter(entry, REASON_MISSING_ID).await;
        }

        // (c) Validated typed parse — the pipeline's schema gate
        let opportunity: Opportunity = match serde_json::from_value(parsed) {
            Ok(opp) => opp,
            Err(e) => {
                debug!("[forwarder] Entry {} failed typed parse: {}", entry.id, e);
                return self.dead_letter(entry, REASON_SCHEMA_INVALID).await;
            }
        };
        if let Err(e) = opportunity.validate() {
            debug!("[forwarder] Entry {} failed validation: {}", entry.id, e);
            return self.dead_letter(entry, REASON_SCHEMA_INVALID).await;
        }

        // Enrich with coordinator metadata
        let now = now_ms();
        let mut opportunity = opportunity;
        opportunity.pipeline_timestamps.coordinator_at = Some(now);
        let request = ExecutionRequest {
            opportunity,
            forwarded_by: self.instance_id.clone(),
            forwarded_at: now,
            strategy_hint: None,
        };

        match self
            .bus
            .publish(
                topology::EXECUTION_REQUESTS,
                &request,
                self.caps.execution_requests,
            )
            .await
        {
            Ok(_) => {
                debug!(
                    "[forwarder] Forwarded opportunity {} ({})",
                    request.id(),
                    request.opportunity.kind
                );
                Routed::Forwarded(entry.id.clone())
            }
            Err(e) => {
                error!(
                    "[forwarder] Forward of {} failed, leaving entry pending: {}",
                    request.id(),
                    e
                );
                Routed::LeftPending
            }
        }
    }

    async fn dead_letter(&mut self, entry: &RawEntry, reason: &str) -> Routed {
        warn!("[forwarder] Dead-lettering entry {} ({})", entry.id, reason);
        metrics::FORWARDING_DLQ_TOTAL.with_label_values(&[reason]).inc();

        match self
            .bus
            .move_to_dlq(
                topology::OPPORTUNITIES,
                topology::COORDINATOR_GROUP,
                entry,
                topology::FORWARDING_DLQ,
                reason,
                self.caps.forwarding_dlq,
            )
            .await
        {
            Ok(_) => Routed::DeadLettered,
            Err(e) => {
                // Substrate loss mid-DLQ: the entry stays pending and will
                // be routed again on redelivery.
                error!(
                    "[forwarder] DLQ routing for {} failed, leaving entry pending: {}",
                    entry.id, e
                );
                Routed::LeftPending
            }
        }
    }
}
