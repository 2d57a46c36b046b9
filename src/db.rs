//! Durable store: async SQLite access via SQLx, shared by the cache's L2
//! tier and the custom-RBL tables.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

/// Distinguishes shared-cache in-memory databases so two handles never
/// alias each other.
static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking
    /// indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (or create) the database and run migrations.
    pub async fn connect(path: &str, pool_max: u32) -> Result<Self> {
        let pool = if path == ":memory:" {
            // A named shared-cache in-memory database: every pooled
            // connection sees the same data, and separate handles stay
            // isolated from each other.
            let name = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
            let options = SqliteConnectOptions::from_str(&format!(
                "sqlite:file:mimir_mem_{}?mode=memory&cache=shared",
                name
            ))?;

            // Keep one connection alive so the in-memory database is not
            // dropped between uses.
            SqlitePoolOptions::new()
                .max_connections(pool_max)
                .min_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                );
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(pool_max)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!("Database connected at {}", path);

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, draining in-flight connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        for statement in include_str!("../migrations/001_init.sql").split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(pool).await?;
        }
        info!("Database migrations applied (001_init)");
        Ok(())
    }
}
