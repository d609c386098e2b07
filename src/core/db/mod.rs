//! Store Adapter (SQLite)
//!
//! The single authoritative connection pool and the typed operations every
//! other component persists through. Owns schema migrations; nothing else
//! writes SQL.

mod audit;
mod bills;
mod civic;
mod error;
mod issues;
mod jurisdictions;
mod representatives;
mod runs;
mod sessions;

pub use audit::AuditEntry;
pub use error::{StoreError, StoreResult};
pub use representatives::UpsertOutcome;

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};

/// Store handle over the shared pool
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect using a sqlite connection string
    ///
    /// Fails with `StoreError::Unavailable` when the database cannot be
    /// opened; the caller maps that to the store-unavailable exit code.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StoreError::unavailable(format!("connect to {url}"), Some(e)))?;

        Self::configure_pragmas(&pool).await?;

        Ok(Store { pool })
    }

    /// In-memory store for tests
    pub async fn connect_memory() -> StoreResult<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::unavailable("connect in-memory", Some(e)))?;
        Self::configure_pragmas(&pool).await?;
        Ok(Store { pool })
    }

    /// SQLite settings for durability and concurrent readers
    async fn configure_pragmas(pool: &SqlitePool) -> StoreResult<()> {
        // WAL lets readers proceed while a writer commits
        sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
        sqlx::query("PRAGMA temp_store = MEMORY").execute(pool).await?;
        tracing::debug!("store pragmas configured (WAL, foreign keys, busy timeout)");
        Ok(())
    }

    /// Apply pending migrations, one transaction per step
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("store migrations up to date");
        Ok(())
    }

    /// Begin a transaction for batched ingestion
    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::unavailable("begin transaction", Some(e)))?;
        Ok(tx)
    }

    /// Access the underlying pool (read-side queries, health checks)
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
