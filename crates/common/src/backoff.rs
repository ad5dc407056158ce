/*!
 * Retry Policy with Exponential Backoff
 *
 * The substrate adapter retries transient Redis failures with this policy
 * before surfacing `substrate-unavailable`. Delays grow 100 ms -> 30 s with
 * ±20% jitter; the attempt cap and wall-clock budget bound the total stall
 * to roughly five minutes.
 */

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with jitter and a wall-clock budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
    /// Maximum retry attempts before giving up
    pub max_attempts: u32,
    /// Total wall-clock budget across all attempts
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            budget: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Short policy for best-effort publishers (heartbeats) that must not
    /// stall their service for minutes.
    pub fn short() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
            budget: Duration::from_secs(5),
        }
    }

    /// Delay before retry `attempt` (1-indexed): min(base * 2^(attempt-1), max)
    /// with ±20% jitter to spread reconnect storms.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << exp)
            .min(self.max_delay.as_millis()) as u64;

        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(0.8..1.2);
        Duration::from_millis((raw_ms as f64 * jitter_factor) as u64)
    }

    /// True when another retry is allowed for `attempt` given time `spent`.
    pub fn allows(&self, attempt: u32, spent: Duration) -> bool {
        attempt <= self.max_attempts && spent < self.budget
    }
}

/// Transient Redis failures worth retrying: connection-level trouble and
/// server states that resolve on their own (failover, read-only replica).
pub fn is_transient(err: &redis::RedisError) -> bool {
    use redis::ErrorKind;

    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_cluster_error()
    {
        return true;
    }

    matches!(
        err.kind(),
        ErrorKind::TryAgain | ErrorKind::ReadOnly | ErrorKind::MasterDown | ErrorKind::BusyLoadingError
    )
}
