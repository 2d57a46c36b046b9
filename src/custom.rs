//! Locally administered block-list: an authoritative CIDR table checked by
//! containment, plus the single-row zone configuration the DNS engine reads
//! at startup.

use std::net::IpAddr;

use ipnet::IpNet;
use sqlx::SqlitePool;
use tracing::debug;

use crate::constants::LISTED_SENTINEL;
use crate::error::{MimirError, Result};
use crate::ip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRblConfig {
    pub zone_name: String,
    pub description: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRblEntry {
    pub id: i64,
    pub network: IpNet,
    pub listed: bool,
    pub reason: Option<String>,
    pub added_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of a containment check against the custom table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCheck {
    pub listed: bool,
    pub response: Option<IpAddr>,
    pub reason: Option<String>,
    pub network: Option<IpNet>,
}

impl CustomCheck {
    fn not_listed() -> Self {
        Self {
            listed: false,
            response: None,
            reason: None,
            network: None,
        }
    }
}

/// Among the listed entries whose network contains `ip`, pick the most
/// specific; ties go to the oldest id.
pub fn longest_prefix_match<'a>(
    entries: &'a [CustomRblEntry],
    addr: &IpAddr,
) -> Option<&'a CustomRblEntry> {
    entries
        .iter()
        .filter(|e| e.listed && ip::cidr_contains(&e.network, addr))
        .max_by_key(|e| (e.network.prefix_len(), std::cmp::Reverse(e.id)))
}

/// Parse admin-supplied CIDR text. A bare address becomes a host network.
fn parse_network(text: &str) -> Result<IpNet> {
    let text = text.trim();
    let net = if text.contains('/') {
        text.parse::<IpNet>()
            .map_err(|_| MimirError::InvalidCidr(text.to_string()))?
    } else {
        let addr = text
            .parse::<IpAddr>()
            .map_err(|_| MimirError::InvalidCidr(text.to_string()))?;
        IpNet::from(addr)
    };
    // Zero the host bits so equal networks always spell the same.
    Ok(net.trunc())
}

#[derive(Clone)]
pub struct CustomRblStore {
    pool: SqlitePool,
}

impl CustomRblStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// The enabled zone configuration, if any. At most one row is enabled.
    pub async fn config(&self) -> Result<Option<CustomRblConfig>> {
        let row = sqlx::query_as::<_, (String, Option<String>, bool)>(
            "SELECT zone_name, description, enabled FROM custom_rbl_config WHERE enabled = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(zone_name, description, enabled)| CustomRblConfig {
            zone_name,
            description,
            enabled,
        }))
    }

    /// Administrative: replace the zone configuration. Enabling a zone
    /// disables any other row first.
    pub async fn set_config(
        &self,
        zone_name: &str,
        description: Option<&str>,
        enabled: bool,
    ) -> Result<()> {
        let zone_name = zone_name.trim_end_matches('.').to_lowercase();
        if zone_name.is_empty() {
            return Err(MimirError::ValidationError(
                "custom RBL zone name must not be empty".to_string(),
            ));
        }

        if enabled {
            sqlx::query("UPDATE custom_rbl_config SET enabled = 0")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO custom_rbl_config (zone_name, description, enabled)
            VALUES (?, ?, ?)
            ON CONFLICT (zone_name) DO UPDATE SET
                description = excluded.description,
                enabled = excluded.enabled
            "#,
        )
        .bind(&zone_name)
        .bind(description)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Check an IP against the table. Never consults the tiered cache: the
    /// table itself is authoritative and cheap to query.
    pub async fn check(&self, addr: &IpAddr) -> Result<CustomCheck> {
        let entries = self.listed_entries().await?;

        match longest_prefix_match(&entries, addr) {
            Some(entry) => Ok(CustomCheck {
                listed: true,
                response: Some(IpAddr::V4(LISTED_SENTINEL)),
                reason: entry.reason.clone(),
                network: Some(entry.network),
            }),
            None => Ok(CustomCheck::not_listed()),
        }
    }

    /// Administrative: add a network. Duplicates and malformed CIDRs are
    /// rejected with distinct errors.
    pub async fn add_entry(
        &self,
        network: &str,
        reason: Option<&str>,
        added_by: Option<&str>,
    ) -> Result<CustomRblEntry> {
        let net = parse_network(network)?;
        let net_text = net.to_string();
        let now = Self::now();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM custom_rbl_entries WHERE network = ?")
                .bind(&net_text)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(MimirError::DuplicateEntry(net_text));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO custom_rbl_entries (network, listed, reason, added_by, created_at, updated_at)
            VALUES (?, 1, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&net_text)
        .bind(reason)
        .bind(added_by)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!("Added custom RBL entry {} ({})", id, net_text);
        Ok(CustomRblEntry {
            id,
            network: net,
            listed: true,
            reason: reason.map(|s| s.to_string()),
            added_by: added_by.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
        })
    }

    /// Administrative: remove by id.
    pub async fn remove_by_id(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM custom_rbl_entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Administrative: remove by network.
    pub async fn remove_by_network(&self, network: &str) -> Result<bool> {
        let net = parse_network(network)?;
        let result = sqlx::query("DELETE FROM custom_rbl_entries WHERE network = ?")
            .bind(net.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Administrative: update the reason and/or listed flag of an entry.
    pub async fn update_entry(
        &self,
        id: i64,
        listed: Option<bool>,
        reason: Option<&str>,
    ) -> Result<bool> {
        if listed.is_none() && reason.is_none() {
            return Err(MimirError::ValidationError(
                "nothing to update".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE custom_rbl_entries SET
                listed = COALESCE(?, listed),
                reason = COALESCE(?, reason),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(listed)
        .bind(reason)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Administrative: page through entries in id order.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<CustomRblEntry>> {
        let rows = sqlx::query_as::<_, (i64, String, bool, Option<String>, Option<String>, i64, i64)>(
            r#"
            SELECT id, network, listed, reason, added_by, created_at, updated_at
            FROM custom_rbl_entries
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(Self::entry_from_row)
            .collect())
    }

    async fn listed_entries(&self) -> Result<Vec<CustomRblEntry>> {
        let rows = sqlx::query_as::<_, (i64, String, bool, Option<String>, Option<String>, i64, i64)>(
            r#"
            SELECT id, network, listed, reason, added_by, created_at, updated_at
            FROM custom_rbl_entries
            WHERE listed = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(Self::entry_from_row)
            .collect())
    }

    fn entry_from_row(
        row: (i64, String, bool, Option<String>, Option<String>, i64, i64),
    ) -> Option<CustomRblEntry> {
        let (id, network, listed, reason, added_by, created_at, updated_at) = row;
        // A row that no longer parses is skipped rather than failing the
        // whole lookup.
        let network = network.parse::<IpNet>().ok()?;
        Some(CustomRblEntry {
            id,
            network,
            listed,
            reason,
            added_by,
            created_at,
            updated_at,
        })
    }
}
