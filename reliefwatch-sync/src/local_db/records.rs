//! Field records, one table per entity kind

use super::{format_ts, parse_ts, LocalDatabase};
use crate::error::{SyncError, SyncResult};
use crate::models::{EntityKind, LocalRecord, MutationPayload, RecordFilter, RecordSyncStatus};
use crate::record_encryption::SensitivityPolicy;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

const RECORD_COLUMNS: &str =
    "entity_id, sync_status, server_version, public_data, encrypted_data, created_at, last_modified";

impl LocalDatabase {
    /// Insert or replace a record, encrypting its sensitive fields
    ///
    /// A `None` server version keeps the one already stored.
    pub async fn save_record(
        &self,
        entity_id: &str,
        payload: &MutationPayload,
        status: RecordSyncStatus,
        server_version: Option<i64>,
    ) -> SyncResult<LocalRecord> {
        payload.validate()?;
        let kind = payload.kind();
        let (public_data, encrypted_data) = self.split_for_storage(kind, payload)?;
        let stamp = self.stamp();

        let mut conn = self.pool.acquire().await?;
        let row = upsert_record(
            &mut conn,
            kind,
            entity_id,
            status,
            server_version,
            (&public_data, encrypted_data.as_deref()),
            &stamp.text,
        )
        .await?;

        let created_at: String = row.try_get("created_at")?;
        let stored_version: Option<i64> = row.try_get("server_version")?;

        tracing::debug!(
            entity_kind = ?kind,
            entity_id = entity_id,
            sync_status = %status,
            encrypted = encrypted_data.is_some(),
            "Saved record"
        );

        Ok(LocalRecord {
            kind,
            entity_id: entity_id.to_string(),
            payload: payload.clone(),
            sync_status: status,
            server_version: stored_version,
            created_at: parse_ts(&created_at)?,
            last_modified: stamp.at,
        })
    }

    pub async fn get_record(&self, kind: EntityKind, entity_id: &str) -> SyncResult<Option<LocalRecord>> {
        let table = kind.table();
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM {table} WHERE entity_id = ?"
        ))
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.decode_record(kind, &row)).transpose()
    }

    /// Records matching `filter`, most recently modified first
    pub async fn query_records(&self, filter: &RecordFilter) -> SyncResult<Vec<LocalRecord>> {
        let table = filter.kind.table();
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM {table} WHERE 1 = 1");
        if filter.status.is_some() {
            sql.push_str(" AND sync_status = ?");
        }
        if filter.modified_after.is_some() {
            sql.push_str(" AND last_modified >= ?");
        }
        if filter.modified_before.is_some() {
            sql.push_str(" AND last_modified < ?");
        }
        sql.push_str(" ORDER BY last_modified DESC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(after) = filter.modified_after {
            query = query.bind(format_ts(&after));
        }
        if let Some(before) = filter.modified_before {
            query = query.bind(format_ts(&before));
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = self.decode_record(filter.kind, &row)?;
            let sub_type_matches = filter
                .sub_type
                .as_deref()
                .map_or(true, |wanted| record.payload.sub_type().eq_ignore_ascii_case(wanted));
            if sub_type_matches {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn set_sync_status(
        &self,
        kind: EntityKind,
        entity_id: &str,
        status: RecordSyncStatus,
        server_version: Option<i64>,
    ) -> SyncResult<()> {
        let stamp = self.stamp();
        let table = kind.table();
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET sync_status = ?,
                server_version = COALESCE(?, server_version),
                last_modified = ?
            WHERE entity_id = ?
            "#
        ))
        .bind(status.as_str())
        .bind(server_version)
        .bind(&stamp.text)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("{kind} record {entity_id}")));
        }

        tracing::debug!(entity_kind = ?kind, entity_id = entity_id, sync_status = %status, "Updated sync status");
        Ok(())
    }

    pub async fn delete_record(&self, kind: EntityKind, entity_id: &str) -> SyncResult<bool> {
        let table = kind.table();
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE entity_id = ?"))
            .bind(entity_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        tracing::debug!(entity_kind = ?kind, entity_id = entity_id, deleted, "Deleted record");
        Ok(deleted)
    }

    /// Undo an optimistic update on disk, atomically
    ///
    /// The record goes back to `original` as SYNCED, or is deleted when there
    /// was none, and every queue item carrying `update_id` is dropped. Returns
    /// how many queue items were dropped. Nothing is written if any step fails.
    pub async fn restore_record(
        &self,
        kind: EntityKind,
        entity_id: &str,
        original: Option<&MutationPayload>,
        update_id: Uuid,
    ) -> SyncResult<u64> {
        let sealed = original
            .map(|payload| -> SyncResult<(String, Option<String>)> {
                payload.validate()?;
                self.split_for_storage(kind, payload)
            })
            .transpose()?;
        let stamp = self.stamp();

        let mut tx = self.pool.begin().await?;

        match &sealed {
            Some((public_data, encrypted_data)) => {
                upsert_record(
                    &mut tx,
                    kind,
                    entity_id,
                    RecordSyncStatus::Synced,
                    None,
                    (public_data, encrypted_data.as_deref()),
                    &stamp.text,
                )
                .await?;
            }
            None => {
                sqlx::query(&format!("DELETE FROM {} WHERE entity_id = ?", kind.table()))
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let dropped = sqlx::query("DELETE FROM sync_queue WHERE update_id = ?")
            .bind(update_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::debug!(
            entity_kind = ?kind,
            entity_id = entity_id,
            update_id = %update_id,
            restored = sealed.is_some(),
            dropped,
            "Restored record"
        );
        Ok(dropped)
    }

    /// Record counts by sync status for one kind
    pub async fn record_status_counts(
        &self,
        kind: EntityKind,
    ) -> SyncResult<BTreeMap<RecordSyncStatus, u64>> {
        let table = kind.table();
        let rows = sqlx::query(&format!(
            "SELECT sync_status, COUNT(*) AS n FROM {table} GROUP BY sync_status"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let status: String = row.try_get("sync_status")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(RecordSyncStatus::from_str(&status)?, super::to_u64(n));
        }
        Ok(counts)
    }

    /// (public JSON, encrypted blob) as stored
    pub(super) fn split_for_storage(
        &self,
        kind: EntityKind,
        payload: &MutationPayload,
    ) -> SyncResult<(String, Option<String>)> {
        let value = payload.to_value()?;
        if !self.sensitivity.requires_encryption(kind) {
            return Ok((serde_json::to_string(&value)?, None));
        }

        let cipher = self.key_slot.current()?;
        let (public, sensitive) = self.sensitivity.split(kind, value);
        Ok((serde_json::to_string(&public)?, Some(cipher.encrypt(&sensitive)?)))
    }

    fn decode_record(&self, kind: EntityKind, row: &SqliteRow) -> SyncResult<LocalRecord> {
        let entity_id: String = row.try_get("entity_id")?;
        let sync_status: String = row.try_get("sync_status")?;
        let public_data: String = row.try_get("public_data")?;
        let encrypted_data: Option<String> = row.try_get("encrypted_data")?;
        let created_at: String = row.try_get("created_at")?;
        let last_modified: String = row.try_get("last_modified")?;

        let public: serde_json::Value = serde_json::from_str(&public_data)?;
        let value = match encrypted_data {
            Some(blob) => {
                let sensitive = self.key_slot.current()?.decrypt(&blob)?;
                SensitivityPolicy::merge(public, sensitive)
            }
            None => public,
        };

        Ok(LocalRecord {
            kind,
            payload: MutationPayload::from_value(kind, value)?,
            sync_status: RecordSyncStatus::from_str(&sync_status)?,
            server_version: row.try_get("server_version")?,
            created_at: parse_ts(&created_at)?,
            last_modified: parse_ts(&last_modified)?,
            entity_id,
        })
    }
}

/// Insert or replace one stored row; `None` keeps the stored server version
pub(super) async fn upsert_record(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
    status: RecordSyncStatus,
    server_version: Option<i64>,
    (public_data, encrypted_data): (&str, Option<&str>),
    stamp: &str,
) -> SyncResult<SqliteRow> {
    let table = kind.table();
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO {table} (
            entity_id, sync_status, server_version, public_data,
            encrypted_data, created_at, last_modified
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity_id) DO UPDATE SET
            sync_status = excluded.sync_status,
            server_version = COALESCE(excluded.server_version, {table}.server_version),
            public_data = excluded.public_data,
            encrypted_data = excluded.encrypted_data,
            last_modified = excluded.last_modified
        RETURNING created_at, server_version
        "#
    ))
    .bind(entity_id)
    .bind(status.as_str())
    .bind(server_version)
    .bind(public_data)
    .bind(encrypted_data)
    .bind(stamp)
    .bind(stamp)
    .fetch_one(conn)
    .await?;

    Ok(row)
}
