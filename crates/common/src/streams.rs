/*!
 * Stream Substrate Adapter
 *
 * The single choke point for all Redis Streams traffic. Every durable hop in
 * the pipeline goes through this adapter:
 *
 * ```text
 * detectors ──▶ stream:opportunities ──▶ coordinator ──▶ stream:execution-requests
 *                                                               │
 *                                                               ▼
 *                                                           executor ──▶ stream:execution-results
 * ```
 *
 * ## Commands Used
 *
 * - **XADD ... MAXLEN ~ cap**: publish with approximate retention
 * - **XGROUP CREATE ... MKSTREAM**: lazy, idempotent group creation
 * - **XREADGROUP ... BLOCK ... >**: consumer-group delivery
 * - **XACK**: acknowledge (idempotent)
 * - **XPENDING**: pending-entry inspection (summary + extended)
 * - **XCLAIM**: ownership transfer of long-idle entries (crash recovery)
 *
 * ## Wire Envelope
 *
 * Every entry carries a single `data` field whose value is a JSON document.
 * The adapter never inspects the JSON; malformed payloads are the consumer's
 * problem (DLQ or ack-only per component policy).
 *
 * ## Retry Contract
 *
 * Transient failures are retried with capped exponential backoff
 * (100 ms -> 30 s, max 20 attempts, ~5 min budget) and then surfaced as
 * `Error::SubstrateUnavailable`. All operations are idempotent under retry
 * except `publish`, which appends a new entry per invocation; callers
 * deduplicate on the `id` carried in the payload.
 *
 * ## Connection Discipline
 *
 * `XREADGROUP BLOCK` parks the whole multiplexed connection, so every
 * blocking read loop owns its own `StreamBus` (its own connection manager).
 * Non-blocking publishers may share one freely via `clone()`.
 */

use redis::aio::ConnectionManager;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backoff::{RetryPolicy, is_transient};
use crate::error::{Error, Result};

/// One stream entry as delivered by the substrate.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Substrate-assigned, monotonically increasing id
    pub id: String,
    /// Field/value pairs; pipeline entries carry a single `data` field
    pub fields: Vec<(String, String)>,
}

impl RawEntry {
    /// The JSON payload, when the entry follows the pipeline envelope.
    pub fn data(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == "data")
            .map(|(_, value)| value.as_str())
    }
}

/// Consumer-group pending summary for monitoring and reclaim decisions.
#[derive(Debug, Clone, Default)]
pub struct PendingSummary {
    pub count: u64,
    /// Smallest idle age among sampled pending entries (ms)
    pub min_idle_ms: u64,
    /// Lowest (oldest) pending entry id
    pub oldest_entry_id: Option<String>,
    /// (consumer name, pending count) pairs
    pub consumers: Vec<(String, u64)>,
}

/// One pending entry from the extended XPENDING form.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entry_id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Redis Streams adapter with connection management and retry.
pub struct StreamBus {
    manager: ConnectionManager,
    retry: RetryPolicy,
}

impl Clone for StreamBus {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            retry: self.retry,
        }
    }
}

impl StreamBus {
    /// Connect with the default retry policy.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with_policy(redis_url, RetryPolicy::default()).await
    }

    /// Connect with an explicit retry policy (heartbeat publishers use
    /// `RetryPolicy::short()` so they never stall their service).
    pub async fn connect_with_policy(redis_url: &str, retry: RetryPolicy) -> Result<Self> {
        info!("Connecting to stream substrate at {}", redis_url);

        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Stream substrate connection established");
        Ok(Self { manager, retry })
    }

    /// Liveness probe.
    pub async fn ping(&mut self) -> Result<()> {
        let cmd = redis::cmd("PING");
        let _: String = self.query_with_retry(&cmd, "PING").await?;
        Ok(())
    }

    /// Append `payload` as the `data` field of a new entry, trimming the
    /// stream to roughly `max_len_approx` entries. Returns the entry id.
    pub async fn publish<T: Serialize>(
        &mut self,
        stream: &str,
        payload: &T,
        max_len_approx: usize,
    ) -> Result<String> {
        let json = serde_json::to_string(payload)?;
        self.publish_fields(stream, &[("data", json.as_str())], max_len_approx)
            .await
    }

    /// Append arbitrary fields (used by DLQ routing, which carries the
    /// original payload plus failure metadata).
    pub async fn publish_fields(
        &mut self,
        stream: &str,
        fields: &[(&str, &str)],
        max_len_approx: usize,
    ) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len_approx)
            .arg("*");
        for (key, value) in fields {
            cmd.arg(*key).arg(*value);
        }

        let id: String = self.query_with_retry(&cmd, "XADD").await?;
        debug!("Published entry {} to {}", id, stream);
        Ok(id)
    }

    /// Create the consumer group if missing. Idempotent: a BUSYGROUP reply
    /// means someone else already created it.
    pub async fn ensure_group(&mut self, stream: &str, group: &str) -> Result<()> {
        let result: std::result::Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.manager)
            .await;

        match result {
            Ok(_) => {
                info!("Created consumer group '{}' on '{}'", group, stream);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists on '{}'", group, stream);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block up to `block` for up to `count` entries not yet delivered to
    /// this group.
    pub async fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>> {
        self.read_group_from(stream, group, consumer, count, block, ">")
            .await
    }

    /// Re-read this consumer's own pending entries (delivered before a
    /// restart but never acknowledged). Start id "0" walks the PEL from the
    /// beginning; an empty result means the backlog is drained.
    pub async fn read_own_pending(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<RawEntry>> {
        self.read_group_from(stream, group, consumer, count, Duration::ZERO, "0")
            .await
    }

    async fn read_group_from(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        start_id: &str,
    ) -> Result<Vec<RawEntry>> {
        // Typed reply: [(stream, [(entry_id, [field, value, ...])])]
        type Reply = Option<Vec<(String, Vec<(String, Vec<(String, String)>)>)>>;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg(start_id);

        let reply: Reply = self.query_with_retry(&cmd, "XREADGROUP").await?;

        let mut entries = Vec::new();
        if let Some(streams) = reply {
            for (_stream_name, stream_entries) in streams {
                for (id, raw_fields) in stream_entries {
                    entries.push(RawEntry {
                        id,
                        fields: raw_fields,
                    });
                }
            }
        }

        if !entries.is_empty() {
            debug!("Read {} entries from {} ({})", entries.len(), stream, group);
        }
        Ok(entries)
    }

    /// Newest-first tail read without a consumer group (XREVRANGE). The
    /// health monitor folds heartbeats this way; observers of result and
    /// event streams can too.
    pub async fn read_recent(&mut self, stream: &str, count: usize) -> Result<Vec<RawEntry>> {
        type Reply = Vec<(String, Vec<(String, String)>)>;

        let mut cmd = redis::cmd("XREVRANGE");
        cmd.arg(stream).arg("+").arg("-").arg("COUNT").arg(count);

        let raw: Reply = self.query_with_retry(&cmd, "XREVRANGE").await?;
        Ok(raw
            .into_iter()
            .map(|(id, fields)| RawEntry { id, fields })
            .collect())
    }

    /// Acknowledge processed entries. Idempotent; acknowledging an unknown
    /// id is a no-op on the server.
    pub async fn ack(&mut self, stream: &str, group: &str, entry_ids: &[String]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in entry_ids {
            cmd.arg(id);
        }

        let acked: u64 = self.query_with_retry(&cmd, "XACK").await?;
        debug!("Acknowledged {}/{} entries on {}", acked, entry_ids.len(), stream);
        Ok(acked)
    }

    /// Pending-entry summary for the group, enriched with the oldest entry
    /// id and the smallest idle age from the extended form.
    pub async fn pending_summary(&mut self, stream: &str, group: &str) -> Result<PendingSummary> {
        // Summary reply: (count, min_id|nil, max_id|nil, [[consumer, count]]|nil)
        type SummaryReply = (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>);

        let cmd = {
            let mut c = redis::cmd("XPENDING");
            c.arg(stream).arg(group);
            c
        };
        let (count, _min_id, _max_id, consumers_raw): SummaryReply =
            self.query_with_retry(&cmd, "XPENDING").await?;

        let consumers = consumers_raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, pending)| {
                let n = pending.parse::<u64>().unwrap_or(0);
                (name, n)
            })
            .collect();

        if count == 0 {
            return Ok(PendingSummary {
                count,
                consumers,
                ..Default::default()
            });
        }

        let sampled = self
            .pending_entries(stream, group, Duration::ZERO, 100)
            .await?;
        let min_idle_ms = sampled.iter().map(|e| e.idle_ms).min().unwrap_or(0);
        let oldest_entry_id = sampled.first().map(|e| e.entry_id.clone());

        Ok(PendingSummary {
            count,
            min_idle_ms,
            oldest_entry_id,
            consumers,
        })
    }

    /// Extended XPENDING: entries idle for at least `min_idle`, oldest
    /// first, up to `count`.
    pub async fn pending_entries(
        &mut self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        type ExtendedReply = Vec<(String, String, u64, u64)>;

        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream).arg(group);
        if !min_idle.is_zero() {
            cmd.arg("IDLE").arg(min_idle.as_millis() as u64);
        }
        cmd.arg("-").arg("+").arg(count);

        let raw: ExtendedReply = self.query_with_retry(&cmd, "XPENDING").await?;

        Ok(raw
            .into_iter()
            .map(|(entry_id, consumer, idle_ms, delivery_count)| PendingEntry {
                entry_id,
                consumer,
                idle_ms,
                delivery_count,
            })
            .collect())
    }

    /// Transfer ownership of long-idle pending entries to `consumer`.
    /// Entries still return through the normal processing path; the idle
    /// floor stops us from stealing work that is merely slow.
    pub async fn claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> Result<Vec<RawEntry>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        type ClaimReply = Vec<(String, Vec<(String, String)>)>;

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for id in entry_ids {
            cmd.arg(id);
        }

        let raw: ClaimReply = self.query_with_retry(&cmd, "XCLAIM").await?;

        let entries: Vec<RawEntry> = raw
            .into_iter()
            .map(|(id, fields)| RawEntry { id, fields })
            .collect();

        if !entries.is_empty() {
            info!(
                "Claimed {} idle entries on {} for consumer {}",
                entries.len(),
                stream,
                consumer
            );
        }
        Ok(entries)
    }

    /// Route a poison entry to a dead-letter stream, then acknowledge the
    /// source. The DLQ entry keeps the original payload verbatim under
    /// `data`, plus the failure reason and source coordinates.
    pub async fn move_to_dlq(
        &mut self,
        stream: &str,
        group: &str,
        entry: &RawEntry,
        dlq_stream: &str,
        reason: &str,
        dlq_max_len: usize,
    ) -> Result<String> {
        let original = match entry.data() {
            Some(data) => data.to_string(),
            // Envelope violation: preserve whatever fields were there
            None => serde_json::to_string(&entry.fields)?,
        };

        let fields = [
            ("data", original.as_str()),
            ("reason", reason),
            ("sourceStream", stream),
            ("sourceId", entry.id.as_str()),
        ];
        let dlq_id = self.publish_fields(dlq_stream, &fields, dlq_max_len).await?;

        warn!(
            "Dead-lettered entry {} from {} to {} (reason: {})",
            entry.id, stream, dlq_stream, reason
        );

        self.ack(stream, group, &[entry.id.clone()]).await?;
        Ok(dlq_id)
    }

    /// Run `cmd`, retrying transient failures per the policy. Non-transient
    /// errors surface immediately; budget exhaustion surfaces as
    /// `SubstrateUnavailable`.
    async fn query_with_retry<T: redis::FromRedisValue>(
        &mut self,
        cmd: &redis::Cmd,
        op: &str,
    ) -> Result<T> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let outcome: redis::RedisResult<T> = cmd.query_async(&mut self.manager).await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => {
                    attempt += 1;
                    if !self.retry.allows(attempt, started.elapsed()) {
                        return Err(Error::SubstrateUnavailable(format!(
                            "{op} failed after {attempt} attempts: {e}"
                        )));
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "{} transient failure (attempt {}): {}. Retrying in {:?}",
                        op, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
