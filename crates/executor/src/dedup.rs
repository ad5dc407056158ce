/*!
 * Recent-Id Duplicate Cache
 *
 * A bounded, mutex-guarded LRU of opportunity ids this process has
 * completed. Together with the distributed lock it gives redeliveries a
 * cheap in-process answer:
 *
 * - id completed here, conflict not yet reported -> publish one
 *   `lock-conflict` result, then only ack further duplicates
 * - id unknown here but lock busy -> contention with another instance;
 *   silent ack (the winner publishes)
 *
 * The cache is process-local and lost on crash; a post-crash redelivery
 * therefore looks like fresh work, which is exactly what the deferred-ack
 * recovery path wants.
 */

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default capacity; old ids fall out in LRU order.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// What this process knows about an opportunity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenState {
    /// Never completed here
    Fresh,
    /// Completed here; no lock-conflict result published yet
    CompletedUnreported,
    /// Completed here and the one allowed lock-conflict result is out
    CompletedReported,
}

/// Mutex-guarded LRU of completed opportunity ids.
pub struct RecentIds {
    cache: Mutex<LruCache<String, bool>>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an id, refreshing its LRU position.
    pub fn seen_state(&self, id: &str) -> SeenState {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(id) {
            None => SeenState::Fresh,
            Some(false) => SeenState::CompletedUnreported,
            Some(true) => SeenState::CompletedReported,
        }
    }

    /// Record a completed execution (result published).
    pub fn mark_completed(&self, id: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(id.to_string(), false);
    }

    /// Record that the single lock-conflict result for this id went out.
    pub fn mark_reported(&self, id: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(id.to_string(), true);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
