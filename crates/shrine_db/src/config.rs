//! Event configuration store operations.

use crate::error::{DbError, Result};
use crate::types::{EventConfig, EventConfigPatch};
use crate::ShrineDb;
use sqlx::Row;

impl ShrineDb {
    /// Get a guild's event configuration, creating an empty inactive one
    /// if none exists yet.
    pub async fn find_or_create_config(&self, guild_id: &str) -> Result<EventConfig> {
        if let Some(config) = self.get_config(guild_id).await? {
            return Ok(config);
        }

        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO shrine_event_configs (guild_id, active, created_at, updated_at)
            VALUES (?, 0, ?, ?)
            ON CONFLICT(guild_id) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_config(guild_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("config for guild {guild_id}")))
    }

    /// Get a guild's event configuration if one exists.
    pub async fn get_config(&self, guild_id: &str) -> Result<Option<EventConfig>> {
        let row = sqlx::query(
            "SELECT id, guild_id, channel_id, sticker_id, role_id, active \
             FROM shrine_event_configs WHERE guild_id = ?",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_config(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update to a guild's configuration and return the
    /// updated row. Creates the row first if the guild has none.
    pub async fn update_config(
        &self,
        guild_id: &str,
        patch: EventConfigPatch,
    ) -> Result<EventConfig> {
        let current = self.find_or_create_config(guild_id).await?;

        let channel_id = patch.channel_id.or(current.channel_id);
        let sticker_id = patch.sticker_id.or(current.sticker_id);
        let role_id = patch.role_id.or(current.role_id);
        let active = patch.active.unwrap_or(current.active);

        sqlx::query(
            r#"
            UPDATE shrine_event_configs SET
                channel_id = ?,
                sticker_id = ?,
                role_id = ?,
                active = ?,
                updated_at = ?
            WHERE guild_id = ?
            "#,
        )
        .bind(&channel_id)
        .bind(&sticker_id)
        .bind(&role_id)
        .bind(active)
        .bind(Self::now_millis())
        .bind(guild_id)
        .execute(&self.pool)
        .await?;

        Ok(EventConfig {
            id: current.id,
            guild_id: guild_id.to_string(),
            channel_id,
            sticker_id,
            role_id,
            active,
        })
    }

    fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<EventConfig> {
        Ok(EventConfig {
            id: row.get("id"),
            guild_id: row.get("guild_id"),
            channel_id: row.get("channel_id"),
            sticker_id: row.get("sticker_id"),
            role_id: row.get("role_id"),
            active: row.get("active"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let db = ShrineDb::memory().await.unwrap();

        let first = db.find_or_create_config("g1").await.unwrap();
        let second = db.find_or_create_config("g1").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.channel_id, None);
        assert!(!first.is_scan_ready());
    }

    #[tokio::test]
    async fn patch_updates_only_set_fields() {
        let db = ShrineDb::memory().await.unwrap();
        db.find_or_create_config("g1").await.unwrap();

        let updated = db
            .update_config(
                "g1",
                EventConfigPatch {
                    channel_id: Some("c1".into()),
                    sticker_id: Some("s1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.is_scan_ready());
        assert_eq!(updated.role_id, None);

        let updated = db
            .update_config(
                "g1",
                EventConfigPatch {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.active);
        assert_eq!(updated.channel_id.as_deref(), Some("c1"));
        assert_eq!(updated.sticker_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn event_id_follows_config_row() {
        let db = ShrineDb::memory().await.unwrap();
        let a = db.find_or_create_config("g1").await.unwrap();
        let b = db.find_or_create_config("g2").await.unwrap();
        assert_ne!(a.event_id(), b.event_id());
    }
}
