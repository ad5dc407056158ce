/*!
 * Distributed Locks and Leases
 *
 * Short-TTL Redis keys whose atomic creation grants exclusive ownership:
 *
 * - `lock:opp:{id}` — per-opportunity execution lock (executor instances)
 * - `leader:{region}` — coordinator leader lease
 *
 * Acquisition is `SET key owner NX PX ttl`. Renewal and release compare the
 * stored owner first (Lua, single round-trip) so a holder can never extend
 * or delete a successor's key after its own TTL lapsed.
 */

use lazy_static::lazy_static;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;

lazy_static! {
    /// Extend the TTL iff the key still belongs to us.
    static ref RENEW_SCRIPT: redis::Script = redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
            return 1
        else
            return 0
        end
        "#,
    );

    /// Delete the key iff it still belongs to us.
    static ref RELEASE_SCRIPT: redis::Script = redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    );
}

/// Lock/lease operations bound to one owner identity.
pub struct LockManager {
    manager: ConnectionManager,
    owner: String,
}

impl Clone for LockManager {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl LockManager {
    pub async fn connect(redis_url: &str, owner: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Lock manager connected (owner: {})", owner);
        Ok(Self {
            manager,
            owner: owner.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Atomic set-if-absent with TTL. `true` = we own the key now.
    pub async fn acquire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.manager)
            .await?;

        let acquired = reply.is_some();
        debug!(
            "Lock acquire {} -> {} (owner: {})",
            key,
            if acquired { "acquired" } else { "busy" },
            self.owner
        );
        Ok(acquired)
    }

    /// Compare-and-set TTL extension. `false` means the key expired or was
    /// taken over; the caller must treat itself as demoted.
    pub async fn renew(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let renewed: i64 = RENEW_SCRIPT
            .key(key)
            .arg(&self.owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut self.manager)
            .await?;
        Ok(renewed == 1)
    }

    /// Compare-and-delete. `false` means the key was already gone or owned
    /// by someone else (never deletes a successor's key).
    pub async fn release(&mut self, key: &str) -> Result<bool> {
        let released: i64 = RELEASE_SCRIPT
            .key(key)
            .arg(&self.owner)
            .invoke_async(&mut self.manager)
            .await?;

        debug!(
            "Lock release {} -> {} (owner: {})",
            key,
            if released == 1 { "released" } else { "not-held" },
            self.owner
        );
        Ok(released == 1)
    }

    /// Current holder of the key, if any.
    pub async fn holder(&mut self, key: &str) -> Result<Option<String>> {
        let holder: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.manager)
            .await?;
        Ok(holder)
    }
}
