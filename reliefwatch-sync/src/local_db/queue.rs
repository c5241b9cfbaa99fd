//! The durable sync queue

use super::{parse_opt_ts, parse_ts, parse_uuid, to_u32, to_u64, LocalDatabase};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    EntityKind, MutationAction, MutationPayload, NewQueueItem, PriorityTier, QueueItem,
};
use crate::stats::QueueStats;
use error_common::{report, ErrorContext};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

/// Result of [`LocalDatabase::scan_queue`]
#[derive(Debug, Clone, Default)]
pub struct QueueScan {
    pub items: Vec<QueueItem>,
    /// Rows left in place because their payload could not be read
    pub unreadable: Vec<Uuid>,
}

const QUEUE_COLUMNS: &str = r#"
    sequence, id, entity_type, action, entity_id, payload, priority,
    priority_score, priority_reason, retry_count, created_at, last_attempt,
    last_modified, last_error, base_version, update_id
"#;

impl LocalDatabase {
    /// Persist a mutation for later sync
    ///
    /// Invalid payloads are rejected before anything is written. Fails with
    /// `StorageQuota` once the queue holds `max_queue_items`.
    pub async fn enqueue(&self, item: NewQueueItem) -> SyncResult<QueueItem> {
        let payload = self.seal_queue_payload(&item)?;
        let stamp = self.stamp();

        let mut tx = self.pool.begin().await?;
        let (id, sequence) = self.insert_queue_item(&mut tx, &item, payload.as_deref(), &stamp.text).await?;
        tx.commit().await?;

        tracing::debug!(
            queue_item_id = %id,
            sequence,
            entity_kind = ?item.kind,
            entity_id = %item.entity_id,
            action = %item.action,
            priority_score = item.priority_score,
            "Queued mutation for sync"
        );

        let mut stored = item.preview(stamp.at);
        stored.id = id;
        stored.sequence = sequence;
        Ok(stored)
    }

    /// Validate an item and serialize its payload for the `payload` column
    pub(crate) fn seal_queue_payload(&self, item: &NewQueueItem) -> SyncResult<Option<String>> {
        match (&item.payload, item.action) {
            (Some(payload), _) => {
                payload.validate()?;
                if payload.kind() != item.kind {
                    return Err(SyncError::Validation(format!(
                        "{} payload queued as {}",
                        payload.kind(),
                        item.kind
                    )));
                }
            }
            (None, MutationAction::Delete) => {}
            (None, action) => {
                return Err(SyncError::Validation(format!("{action} requires a payload")));
            }
        }
        if item.entity_id.trim().is_empty() {
            return Err(SyncError::Validation("entity id is required".into()));
        }

        item.payload
            .as_ref()
            .map(|p| -> SyncResult<String> {
                self.seal_json(item.kind, &serde_json::to_value(p)?)
            })
            .transpose()
    }

    /// Insert inside the caller's transaction, enforcing the queue quota
    ///
    /// Returns the new item's id and sequence.
    pub(crate) async fn insert_queue_item(
        &self,
        conn: &mut SqliteConnection,
        item: &NewQueueItem,
        payload: Option<&str>,
        stamp: &str,
    ) -> SyncResult<(Uuid, i64)> {
        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&mut *conn)
            .await?;
        let limit = i64::try_from(self.config.max_queue_items).unwrap_or(i64::MAX);
        if queued >= limit {
            tracing::error!(queued, limit, "Sync queue is full, refusing write");
            return Err(SyncError::StorageQuota(format!(
                "sync queue holds {queued} items (limit {limit})"
            )));
        }

        let id = Uuid::new_v4();
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_queue (
                id, entity_type, action, entity_id, payload, priority,
                priority_score, priority_reason, retry_count, created_at,
                last_modified, base_version, update_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(id.to_string())
        .bind(item.kind.as_str())
        .bind(item.action.as_str())
        .bind(&item.entity_id)
        .bind(payload)
        .bind(item.priority.as_str())
        .bind(i64::from(item.priority_score))
        .bind(&item.priority_reason)
        .bind(stamp)
        .bind(stamp)
        .bind(item.base_version)
        .bind(item.update_id.map(|u| u.to_string()))
        .fetch_one(&mut *conn)
        .await?;

        Ok((id, sequence))
    }

    pub async fn get_queue_item(&self, id: Uuid) -> SyncResult<Option<QueueItem>> {
        let row = sqlx::query(&format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.decode_queue_item(&row)).transpose()
    }

    /// The queue item settling an optimistic update, if still queued
    pub async fn queue_item_for_update(&self, update_id: Uuid) -> SyncResult<Option<QueueItem>> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE update_id = ? ORDER BY sequence LIMIT 1"
        ))
        .bind(update_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.decode_queue_item(&row)).transpose()
    }

    /// Every readable queued item in insertion order
    ///
    /// Callers re-score before draining; the stored score is display-only.
    pub async fn pending_queue_items(&self) -> SyncResult<Vec<QueueItem>> {
        Ok(self.scan_queue().await?.items)
    }

    /// Read the whole queue, setting aside rows that cannot be read
    ///
    /// A row whose payload fails to decrypt or parse is flagged `unreadable`
    /// with the error in `last_error` and left in place. It is read again on
    /// every scan, so it comes back once the right key is installed.
    pub async fn scan_queue(&self) -> SyncResult<QueueScan> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS}, unreadable FROM sync_queue ORDER BY sequence ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut scan = QueueScan::default();
        for row in &rows {
            let flagged: i64 = row.try_get("unreadable")?;
            match self.decode_queue_item(row) {
                Ok(item) => {
                    if flagged != 0 {
                        self.flag_unreadable(item.id, None).await?;
                    }
                    scan.items.push(item);
                }
                Err(err @ (SyncError::Decryption(_) | SyncError::Serialization(_))) => {
                    let id: String = row.try_get("id")?;
                    let id = parse_uuid(&id)?;
                    report(
                        &err,
                        &ErrorContext::new().with_operation("scan_queue").with_queue_item(id),
                    );
                    self.flag_unreadable(id, Some(&err.to_string())).await?;
                    scan.unreadable.push(id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(scan)
    }

    /// Set the flag with an error, or clear it with `None`
    async fn flag_unreadable(&self, id: Uuid, error: Option<&str>) -> SyncResult<()> {
        sqlx::query(
            "UPDATE sync_queue SET unreadable = ?, last_error = COALESCE(?, last_error) WHERE id = ?",
        )
        .bind(i64::from(error.is_some()))
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt; returns the item with its new retry count
    pub async fn record_attempt(&self, id: Uuid, error: &str) -> SyncResult<QueueItem> {
        let stamp = self.stamp();
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET retry_count = retry_count + 1,
                last_error = ?,
                last_attempt = ?,
                last_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(&stamp.text)
        .bind(&stamp.text)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("queue item {id}")));
        }

        tracing::warn!(queue_item_id = %id, error = error, "Sync attempt failed");

        self.get_queue_item(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("queue item {id}")))
    }

    pub async fn delete_queue_item(&self, id: Uuid) -> SyncResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        tracing::debug!(queue_item_id = %id, deleted, "Removed queue item");
        Ok(deleted)
    }

    /// Persist recomputed scores and reasons in one transaction
    pub async fn update_queue_priorities(&self, items: &[QueueItem]) -> SyncResult<u64> {
        let stamp = self.stamp();
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                UPDATE sync_queue
                SET priority_score = ?, priority_reason = ?, last_modified = ?
                WHERE id = ?
                "#,
            )
            .bind(i64::from(item.priority_score))
            .bind(&item.priority_reason)
            .bind(&stamp.text)
            .bind(item.id.to_string())
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(updated, "Persisted queue priorities");
        Ok(updated)
    }

    pub async fn queue_len(&self) -> SyncResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(to_u64(n))
    }

    /// Totals by kind and tier; items past `max_retries` count as exhausted
    pub async fn queue_stats(&self, max_retries: u32) -> SyncResult<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT entity_type, priority, retry_count, unreadable, COUNT(*) AS n
            FROM sync_queue
            GROUP BY entity_type, priority, retry_count, unreadable
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let kind: String = row.try_get("entity_type")?;
            let priority: String = row.try_get("priority")?;
            let retry_count: i64 = row.try_get("retry_count")?;
            let n = to_u64(row.try_get("n")?);

            stats.total += n;
            *stats.by_kind.entry(EntityKind::from_str(&kind)?).or_default() += n;
            *stats.by_tier.entry(PriorityTier::from_str(&priority)?).or_default() += n;
            if retry_count > i64::from(max_retries) {
                stats.exhausted += n;
            }
            if row.try_get::<i64, _>("unreadable")? != 0 {
                stats.unreadable += n;
            }
        }
        Ok(stats)
    }

    fn decode_queue_item(&self, row: &SqliteRow) -> SyncResult<QueueItem> {
        let id: String = row.try_get("id")?;
        let entity_type: String = row.try_get("entity_type")?;
        let action: String = row.try_get("action")?;
        let payload: Option<String> = row.try_get("payload")?;
        let priority: String = row.try_get("priority")?;
        let priority_score: i64 = row.try_get("priority_score")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let created_at: String = row.try_get("created_at")?;
        let last_modified: String = row.try_get("last_modified")?;
        let update_id: Option<String> = row.try_get("update_id")?;

        let payload = payload
            .map(|text| -> SyncResult<MutationPayload> {
                Ok(serde_json::from_value(self.open_json(&text)?)?)
            })
            .transpose()?;

        Ok(QueueItem {
            id: parse_uuid(&id)?,
            sequence: row.try_get("sequence")?,
            kind: EntityKind::from_str(&entity_type)?,
            action: MutationAction::from_str(&action)?,
            entity_id: row.try_get("entity_id")?,
            payload,
            priority: PriorityTier::from_str(&priority)?,
            priority_score: u8::try_from(priority_score.clamp(0, 100)).unwrap_or(0),
            priority_reason: row.try_get("priority_reason")?,
            retry_count: to_u32(retry_count, "retry_count")?,
            created_at: parse_ts(&created_at)?,
            last_attempt: parse_opt_ts(row.try_get("last_attempt")?)?,
            last_modified: parse_ts(&last_modified)?,
            last_error: row.try_get("last_error")?,
            base_version: row.try_get("base_version")?,
            update_id: update_id.as_deref().map(parse_uuid).transpose()?,
        })
    }
}
