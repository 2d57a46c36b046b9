pub mod memory;
pub mod store;

pub use memory::MemoryCache;
pub use store::SqlCacheStore;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LookupErrorKind, Result};
use crate::ip;

/// Cache key: canonical IP text plus the RBL zone it was checked against.
/// Canonicalisation happens here so every tier agrees on equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ip: String,
    pub rbl_host: String,
}

impl CacheKey {
    pub fn new(ip: &IpAddr, rbl_host: &str) -> Self {
        Self {
            ip: ip::canonical(ip),
            rbl_host: rbl_host.trim_end_matches('.').to_lowercase(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.rbl_host)
    }
}

/// Classification of an IP against one RBL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Listed,
    NotListed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub listing: Listing,
    pub response: Option<IpAddr>,
    pub error: Option<LookupErrorKind>,
    pub ttl: u32,
    pub cached_at: i64,
    pub expires_at: i64,
}

impl CacheEntry {
    /// Build an entry at `now`, normalising the fields so the listing
    /// invariants hold: NotListed carries neither response nor error, Error
    /// always carries a kind, and the TTL is at least one second.
    pub fn new(
        listing: Listing,
        response: Option<IpAddr>,
        error: Option<LookupErrorKind>,
        ttl: u32,
        now: i64,
    ) -> Self {
        let ttl = ttl.max(1);
        let (response, error) = match listing {
            Listing::Listed => (response, None),
            Listing::NotListed => (None, None),
            Listing::Error => (None, Some(error.unwrap_or(LookupErrorKind::Network))),
        };

        Self {
            listing,
            response,
            error,
            ttl,
            cached_at: now,
            expires_at: now + ttl as i64,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Seconds left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now: i64) -> u32 {
        (self.expires_at - now).max(0) as u32
    }
}

/// The `stats()` snapshot over the authoritative tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: i64,
    pub valid: i64,
    pub expired: i64,
    pub listed: i64,
    pub not_listed: i64,
    pub errors: i64,
}

/// Runtime hit/miss counters, kept separately from the durable stats.
#[derive(Debug, Default)]
pub struct TierCounters {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub misses: AtomicU64,
}

/// One cache tier. The in-memory L1 implements this; the durable store has
/// a wider interface of its own.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    async fn set(&self, key: &CacheKey, entry: CacheEntry);
    async fn remove_by_ip(&self, ip: &str) -> usize;
    async fn clear(&self) -> usize;
    async fn evict_expired(&self, now: i64) -> usize;
    async fn len(&self) -> usize;
}

/// Two-tier TTL cache: a fast optional in-memory tier in front of the
/// authoritative durable store.
pub struct TieredCache {
    l1: Option<Arc<dyn CacheTier>>,
    store: SqlCacheStore,
    counters: TierCounters,
}

impl TieredCache {
    pub fn new(l1: Option<Arc<dyn CacheTier>>, store: SqlCacheStore) -> Self {
        Self {
            l1,
            store,
            counters: TierCounters::default(),
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Look up a classification. Only non-expired entries are returned; an
    /// L2 hit backfills L1 with the remaining lifetime.
    pub async fn get(&self, ip: &IpAddr, rbl_host: &str) -> Option<CacheEntry> {
        let key = CacheKey::new(ip, rbl_host);
        let now = Self::now();

        if let Some(l1) = &self.l1 {
            if let Some(entry) = l1.get(&key).await {
                if !entry.is_expired(now) {
                    self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("L1 cache hit for {}", key);
                    return Some(entry);
                }
            }
        }

        // A read failure on the durable tier degrades to a cache miss.
        match self.store.get(&key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                debug!("L2 cache hit for {}", key);
                if let Some(l1) = &self.l1 {
                    l1.set(&key, entry.clone()).await;
                }
                Some(entry)
            }
            Ok(_) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!("Durable cache read failed for {}: {}", key, e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Upsert a classification. The L1 write is best-effort; the durable
    /// upsert is the one that can fail.
    pub async fn put(
        &self,
        ip: &IpAddr,
        rbl_host: &str,
        listing: Listing,
        response: Option<IpAddr>,
        error: Option<LookupErrorKind>,
        ttl: u32,
    ) -> Result<()> {
        let key = CacheKey::new(ip, rbl_host);
        let entry = CacheEntry::new(listing, response, error, ttl, Self::now());

        if let Some(l1) = &self.l1 {
            l1.set(&key, entry.clone()).await;
        }

        self.store.upsert(&key, &entry).await
    }

    /// Drop expired entries from both tiers; the count reported is the
    /// authoritative tier's.
    pub async fn clean_expired(&self) -> Result<u64> {
        let now = Self::now();
        if let Some(l1) = &self.l1 {
            l1.evict_expired(now).await;
        }
        self.store.clean_expired(now).await
    }

    pub async fn clear_all(&self) -> Result<u64> {
        if let Some(l1) = &self.l1 {
            l1.clear().await;
        }
        self.store.clear_all().await
    }

    /// Remove every entry for an IP, whatever lexical form the caller used.
    pub async fn clear_by_ip(&self, ip: &IpAddr) -> Result<u64> {
        let canonical = ip::canonical(ip);
        if let Some(l1) = &self.l1 {
            l1.remove_by_ip(&canonical).await;
        }
        self.store.clear_by_ip(&canonical).await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats(Self::now()).await
    }

    pub fn counters(&self) -> &TierCounters {
        &self.counters
    }
}
