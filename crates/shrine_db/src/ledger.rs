//! Participation ledger operations.
//!
//! The ledger is the idempotency store for scan runs: one row per
//! (guild, user, event), `granted_role` flipping false to true at most
//! once.

use crate::error::{DbError, Result};
use crate::types::ParticipationRecord;
use crate::ShrineDb;
use sqlx::Row;

impl ShrineDb {
    /// Look up a participant's record for an event.
    pub async fn find_participant(
        &self,
        guild_id: &str,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<ParticipationRecord>> {
        let row = sqlx::query(
            "SELECT id, guild_id, user_id, event_id, granted_role \
             FROM shrine_event_participants \
             WHERE guild_id = ? AND user_id = ? AND event_id = ?",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_participant(&row)?)),
            None => Ok(None),
        }
    }

    /// Create a participation record with `granted_role = false`.
    ///
    /// Fails with [`DbError::DuplicateKey`] if the triple already exists;
    /// callers treat that as "already created", not as an error. Empty key
    /// components are rejected before touching the database.
    pub async fn create_participant(
        &self,
        guild_id: &str,
        user_id: &str,
        event_id: &str,
    ) -> Result<()> {
        if guild_id.trim().is_empty() || user_id.trim().is_empty() || event_id.trim().is_empty() {
            return Err(DbError::validation(format!(
                "missing key component: guild={guild_id:?} user={user_id:?} event={event_id:?}"
            )));
        }

        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO shrine_event_participants
                (guild_id, user_id, event_id, granted_role, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(guild_id.trim())
        .bind(user_id.trim())
        .bind(event_id.trim())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip a participant's `granted_role` to true.
    ///
    /// Monotonic: the flag never goes back to false and re-marking an
    /// already granted participant is a no-op.
    pub async fn mark_granted(
        &self,
        guild_id: &str,
        user_id: &str,
        event_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shrine_event_participants SET
                granted_role = 1,
                updated_at = ?
            WHERE guild_id = ? AND user_id = ? AND event_id = ?
            "#,
        )
        .bind(Self::now_millis())
        .bind(guild_id)
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count participants recorded for an event (granted or not).
    pub async fn count_participants(&self, guild_id: &str, event_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM shrine_event_participants \
             WHERE guild_id = ? AND event_id = ?",
        )
        .bind(guild_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    fn row_to_participant(row: &sqlx::sqlite::SqliteRow) -> Result<ParticipationRecord> {
        Ok(ParticipationRecord {
            id: row.get("id"),
            guild_id: row.get("guild_id"),
            user_id: row.get("user_id"),
            event_id: row.get("event_id"),
            granted_role: row.get("granted_role"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find() {
        let db = ShrineDb::memory().await.unwrap();

        assert!(db.find_participant("g", "u", "1").await.unwrap().is_none());
        db.create_participant("g", "u", "1").await.unwrap();

        let record = db.find_participant("g", "u", "1").await.unwrap().unwrap();
        assert!(!record.granted_role);
    }

    #[tokio::test]
    async fn duplicate_create_maps_to_duplicate_key() {
        let db = ShrineDb::memory().await.unwrap();
        db.create_participant("g", "u", "1").await.unwrap();

        let err = db.create_participant("g", "u", "1").await.unwrap_err();
        assert!(err.is_duplicate_key(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn empty_key_component_is_rejected() {
        let db = ShrineDb::memory().await.unwrap();
        let err = db.create_participant("g", "  ", "1").await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_granted_is_monotonic() {
        let db = ShrineDb::memory().await.unwrap();
        db.create_participant("g", "u", "1").await.unwrap();

        db.mark_granted("g", "u", "1").await.unwrap();
        db.mark_granted("g", "u", "1").await.unwrap();

        let record = db.find_participant("g", "u", "1").await.unwrap().unwrap();
        assert!(record.granted_role);
    }

    #[tokio::test]
    async fn records_are_scoped_by_event() {
        let db = ShrineDb::memory().await.unwrap();
        db.create_participant("g", "u", "1").await.unwrap();
        db.create_participant("g", "u", "2").await.unwrap();

        db.mark_granted("g", "u", "1").await.unwrap();

        let other = db.find_participant("g", "u", "2").await.unwrap().unwrap();
        assert!(!other.granted_role);
        assert_eq!(db.count_participants("g", "1").await.unwrap(), 1);
    }
}
