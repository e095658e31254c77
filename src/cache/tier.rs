//! In-process L1 cache tier: a bounded, per-region store with TTL expiry and
//! approximate LRU eviction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::RwLock;

/// A single L1 entry: the raw encoded payload plus enough bookkeeping to
/// expire and evict it.
#[derive(Clone)]
struct Entry {
    payload: Arc<[u8]>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Bounded local cache for a single region.
///
/// Eviction is approximate LRU: access order is tracked in a side list
/// rather than reordering the map itself, so a hot key under concurrent
/// read load contends on an append to that list rather than on the entry
/// map. The list is trimmed opportunistically on insert rather than kept
/// perfectly deduplicated, which is the same trade-off the upstream
/// in-process cache in this codebase has always made: approximate recency
/// is enough to keep the working set resident, and exact LRU ordering under
/// concurrency costs more than it buys here.
pub struct LocalTier {
    capacity: u64,
    entries: DashMap<String, Entry>,
    access_order: Arc<RwLock<Vec<String>>>,
}

impl LocalTier {
    /// Create a tier bounded to approximately `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            entries: DashMap::new(),
            access_order: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Fetch an entry, evicting it first if its TTL has elapsed.
    pub async fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.touch(key).await;
        self.entries.get(key).map(|e| e.payload.clone())
    }

    /// Insert or overwrite an entry with the given TTL.
    pub async fn insert(&self, key: String, payload: Arc<[u8]>, ttl: Duration) {
        self.entries.insert(
            key.clone(),
            Entry { payload, inserted_at: Instant::now(), ttl },
        );
        self.touch(key).await;
        self.evict_if_over_capacity().await;
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove every entry in this region's tier.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live (not necessarily unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    async fn touch(&self, key: &str) {
        let mut order = self.access_order.write().await;
        order.push(key.to_string());
    }

    async fn evict_if_over_capacity(&self) {
        if (self.entries.len() as u64) <= self.capacity {
            return;
        }

        let mut order = self.access_order.write().await;
        while (self.entries.len() as u64) > self.capacity {
            let Some(candidate) = order.first().cloned() else {
                break;
            };
            order.retain(|k| k != &candidate);
            self.entries.remove(&candidate);
        }

        // Keep the recency list from growing unbounded relative to the
        // entry count even when nothing is being evicted.
        if order.len() > (self.capacity as usize).saturating_mul(4) {
            let live: std::collections::HashSet<String> =
                self.entries.iter().map(|e| e.key().clone()).collect();
            order.retain(|k| live.contains(k));
        }
    }
}
