//! Persistence layer for Shrinekeeper.
//!
//! Two tables, both owned by this crate: the per-guild event
//! configuration store and the participation ledger used for
//! idempotency across scan runs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shrine_db::{ShrineDb, Result};
//!
//! let db = ShrineDb::open("~/.shrinekeeper/shrinekeeper.sqlite3").await?;
//! let config = db.find_or_create_config("guild-1").await?;
//! let record = db.find_participant("guild-1", "user-1", "1").await?;
//! ```

mod config;
mod error;
mod ledger;
mod schema;
mod types;

pub use error::{DbError, Result};
pub use types::{EventConfig, EventConfigPatch, ParticipationRecord};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Unified database handle for all Shrinekeeper persistence.
#[derive(Clone)]
pub struct ShrineDb {
    pool: SqlitePool,
}

impl ShrineDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    ///
    /// Capped at one connection: each in-memory SQLite connection is its
    /// own database.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Current time as milliseconds since Unix epoch.
    pub(crate) fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
