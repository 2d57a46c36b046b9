use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{CacheEntry, CacheKey, CacheTier};

/// Process-local in-memory cache tier backed by a concurrent map.
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_size: usize,
}

impl MemoryCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
        }
    }

    /// Drop arbitrary entries when over capacity. The durable tier is
    /// authoritative, so eviction here only costs a backfill later.
    fn evict_if_needed(&self) {
        if self.entries.len() < self.max_size {
            return;
        }

        let to_evict = self.entries.len() + 1 - self.max_size;
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .take(to_evict)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &keys {
            self.entries.remove(key);
        }

        if !keys.is_empty() {
            debug!("Evicted {} entries due to memory cache size limit", keys.len());
        }
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        trace!("Memory cache hit for {}", key);
        Some(entry.clone())
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) {
        self.evict_if_needed();
        self.entries.insert(key.clone(), entry);
    }

    async fn remove_by_ip(&self, ip: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.ip != ip);
        before - self.entries.len()
    }

    async fn clear(&self) -> usize {
        let size = self.entries.len();
        self.entries.clear();
        debug!("Cleared {} entries from memory cache", size);
        size
    }

    async fn evict_expired(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Evicted {} expired entries from memory cache", evicted);
        }
        evicted
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}
