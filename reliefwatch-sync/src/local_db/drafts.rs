//! Unsubmitted form drafts

use super::{parse_ts, parse_uuid, LocalDatabase};
use crate::error::{SyncError, SyncResult};
use crate::models::{Draft, EntityKind, MutationPayload};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

impl LocalDatabase {
    /// Create or overwrite a draft
    ///
    /// Drafts are not validated; a half-filled form is still worth keeping.
    pub async fn save_draft(
        &self,
        id: Option<Uuid>,
        entity_id: Option<&str>,
        payload: &MutationPayload,
    ) -> SyncResult<Draft> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let kind = payload.kind();
        let data = self.seal_json(kind, &serde_json::to_value(payload)?)?;
        let stamp = self.stamp();

        let row = sqlx::query(
            r#"
            INSERT INTO drafts (id, entity_type, entity_id, data, created_at, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                entity_id = excluded.entity_id,
                data = excluded.data,
                last_modified = excluded.last_modified
            RETURNING created_at
            "#,
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(entity_id)
        .bind(&data)
        .bind(&stamp.text)
        .bind(&stamp.text)
        .fetch_one(&self.pool)
        .await?;

        let created_at: String = row.try_get("created_at")?;
        tracing::debug!(draft_id = %id, entity_kind = ?kind, "Saved draft");

        Ok(Draft {
            id,
            kind,
            entity_id: entity_id.map(str::to_string),
            payload: payload.clone(),
            created_at: parse_ts(&created_at)?,
            last_modified: stamp.at,
        })
    }

    pub async fn get_draft(&self, id: Uuid) -> SyncResult<Option<Draft>> {
        let row = sqlx::query(
            "SELECT id, entity_type, entity_id, data, created_at, last_modified FROM drafts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.decode_draft(&row)).transpose()
    }

    /// Drafts of one kind, most recently edited first
    pub async fn list_drafts(&self, kind: EntityKind) -> SyncResult<Vec<Draft>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, data, created_at, last_modified
            FROM drafts
            WHERE entity_type = ?
            ORDER BY last_modified DESC
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.decode_draft(row)).collect()
    }

    pub async fn delete_draft(&self, id: Uuid) -> SyncResult<bool> {
        let result = sqlx::query("DELETE FROM drafts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn decode_draft(&self, row: &SqliteRow) -> SyncResult<Draft> {
        let id: String = row.try_get("id")?;
        let entity_type: String = row.try_get("entity_type")?;
        let data: String = row.try_get("data")?;
        let created_at: String = row.try_get("created_at")?;
        let last_modified: String = row.try_get("last_modified")?;

        let kind = EntityKind::from_str(&entity_type)?;
        let payload: MutationPayload = serde_json::from_value(self.open_json(&data)?)?;
        if payload.kind() != kind {
            return Err(SyncError::Internal(format!(
                "draft {id} is filed as {kind} but holds {}",
                payload.kind()
            )));
        }

        Ok(Draft {
            id: parse_uuid(&id)?,
            kind,
            entity_id: row.try_get("entity_id")?,
            payload,
            created_at: parse_ts(&created_at)?,
            last_modified: parse_ts(&last_modified)?,
        })
    }
}
