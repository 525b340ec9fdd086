//! Database schema creation.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::ShrineDb;
use tracing::info;

impl ShrineDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        // Per-guild event configuration
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS shrine_event_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL UNIQUE,
                channel_id TEXT,
                sticker_id TEXT,
                role_id TEXT,
                active INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Participation ledger. The unique triple is the race arbiter for
        // multi-instance deployments: a duplicate insert means another
        // writer already created the record.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS shrine_event_participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                granted_role INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(guild_id, user_id, event_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema verified");
        Ok(())
    }
}
