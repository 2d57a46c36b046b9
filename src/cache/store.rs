use std::net::IpAddr;

use sqlx::SqlitePool;
use tracing::debug;

use super::{CacheEntry, CacheKey, CacheStats, Listing};
use crate::error::{LookupErrorKind, Result};

/// Durable cache tier. Authoritative across restarts; rows are addressed by
/// the same canonical `(ip, rbl_host)` key as the in-memory tier.
#[derive(Clone)]
pub struct SqlCacheStore {
    pool: SqlitePool,
}

impl SqlCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, (bool, Option<String>, Option<String>, i64, i64, i64)>(
            r#"
            SELECT listed, response, error, ttl, cached_at, expires_at
            FROM rbl_cache
            WHERE ip = ? AND rbl_host = ?
            "#,
        )
        .bind(&key.ip)
        .bind(&key.rbl_host)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(listed, response, error, ttl, cached_at, expires_at)| {
            let listing = if error.is_some() {
                Listing::Error
            } else if listed {
                Listing::Listed
            } else {
                Listing::NotListed
            };

            CacheEntry {
                listing,
                response: response.and_then(|r| r.parse::<IpAddr>().ok()),
                error: error.map(|e| LookupErrorKind::parse(&e)),
                ttl: ttl.max(1) as u32,
                cached_at,
                expires_at,
            }
        }))
    }

    pub async fn upsert(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rbl_cache (ip, rbl_host, listed, response, error, ttl, cached_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ip, rbl_host) DO UPDATE SET
                listed = excluded.listed,
                response = excluded.response,
                error = excluded.error,
                ttl = excluded.ttl,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&key.ip)
        .bind(&key.rbl_host)
        .bind(entry.listing == Listing::Listed)
        .bind(entry.response.map(|ip| crate::ip::canonical(&ip)))
        .bind(entry.error.map(|e| e.as_str()))
        .bind(entry.ttl as i64)
        .bind(entry.cached_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        debug!("Cached {} for {}s", key, entry.ttl);
        Ok(())
    }

    pub async fn clean_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rbl_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rbl_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_by_ip(&self, canonical_ip: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rbl_cache WHERE ip = ?")
            .bind(canonical_ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self, now: i64) -> Result<CacheStats> {
        let (total, valid, listed, not_listed, errors) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(expires_at > ?), 0),
                    COALESCE(SUM(listed = 1 AND error IS NULL), 0),
                    COALESCE(SUM(listed = 0 AND error IS NULL), 0),
                    COALESCE(SUM(error IS NOT NULL), 0)
                FROM rbl_cache
                "#,
            )
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(CacheStats {
            total,
            valid,
            expired: total - valid,
            listed,
            not_listed,
            errors,
        })
    }
}
