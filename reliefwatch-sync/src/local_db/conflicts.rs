//! Conflict records and their audit trail
//!
//! Creation and resolution each run in a single transaction together with
//! the audit entry they produce.

use super::records::upsert_record;
use super::{parse_opt_ts, parse_ts, parse_uuid, to_u64, LocalDatabase};
use crate::audit::{self, AuditVerification};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    AuditAction, ConflictAuditEntry, ConflictDiff, ConflictFilter, ConflictRecord,
    ConflictSeverity, ConflictStatus, ConflictType, EntityKind, MutationPayload, NewConflict,
    NewQueueItem, RecordSyncStatus, ResolutionStrategy,
};
use crate::stats::ConflictStats;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

const CONFLICT_COLUMNS: &str = r#"
    id, entity_type, entity_id, conflict_type, severity, status, detected_at,
    resolved_at, resolution_strategy, resolved_by, justification,
    local_version, remote_version, data
"#;

/// The `data` column: both sides of the divergence, sealed for sensitive kinds
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictData {
    local_data: Option<Value>,
    remote_data: Option<Value>,
    #[serde(default)]
    diffs: Vec<ConflictDiff>,
}

/// A record write committed with a conflict resolution
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    Save {
        entity_id: String,
        payload: MutationPayload,
        status: RecordSyncStatus,
        server_version: Option<i64>,
    },
    Delete {
        kind: EntityKind,
        entity_id: String,
    },
}

/// Everything a resolution writes besides the conflict itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionEffects {
    pub records: Vec<RecordWrite>,
    pub queue: Vec<NewQueueItem>,
}

impl LocalDatabase {
    /// Persist a conflict with its `CONFLICT_DETECTED` entry
    ///
    /// If the entity already has a PENDING conflict, that one is returned
    /// with its local and server sides replaced by the newer attempt. Its
    /// audit trail is left as is.
    pub async fn create_conflict(&self, conflict: NewConflict) -> SyncResult<ConflictRecord> {
        let data = self.seal_json(
            conflict.entity_type,
            &serde_json::to_value(ConflictData {
                local_data: conflict.local_data.clone(),
                remote_data: conflict.remote_data.clone(),
                diffs: conflict.diffs.clone(),
            })?,
        )?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM conflicts
            WHERE entity_type = ? AND entity_id = ? AND status = 'PENDING'
            ORDER BY detected_at DESC
            LIMIT 1
            "#,
        )
        .bind(conflict.entity_type.as_str())
        .bind(&conflict.entity_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            let id = parse_uuid(&existing)?;
            sqlx::query(
                r#"
                UPDATE conflicts
                SET remote_version = COALESCE(?, remote_version), data = ?, last_modified = ?
                WHERE id = ?
                "#,
            )
            .bind(conflict.remote_version)
            .bind(&data)
            .bind(&self.stamp().text)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            tracing::debug!(
                conflict_id = %id,
                entity_kind = ?conflict.entity_type,
                entity_id = %conflict.entity_id,
                "Refreshed pending conflict with the newer local edit"
            );
            return self
                .get_conflict(id)
                .await?
                .ok_or_else(|| SyncError::NotFound(format!("conflict {id}")));
        }

        let id = Uuid::new_v4();
        let entry = audit::next_entry(
            id,
            None,
            self.clock.now(),
            AuditAction::ConflictDetected,
            &conflict.detected_by,
            json!({
                "conflictType": conflict.conflict_type,
                "severity": conflict.severity,
                "localVersion": conflict.local_version,
                "remoteVersion": conflict.remote_version,
                "diffCount": conflict.diffs.len(),
            }),
        );
        let detected_at = super::format_ts(&entry.timestamp);

        sqlx::query(
            r#"
            INSERT INTO conflicts (
                id, entity_type, entity_id, conflict_type, severity, status,
                detected_at, local_version, remote_version, data, last_modified
            ) VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(conflict.entity_type.as_str())
        .bind(&conflict.entity_id)
        .bind(conflict.conflict_type.as_str())
        .bind(conflict.severity.as_str())
        .bind(&detected_at)
        .bind(conflict.local_version)
        .bind(conflict.remote_version)
        .bind(&data)
        .bind(&detected_at)
        .execute(&mut *tx)
        .await?;

        insert_audit_entry(&mut tx, &entry).await?;
        tx.commit().await?;

        tracing::warn!(
            conflict_id = %id,
            entity_kind = ?conflict.entity_type,
            entity_id = %conflict.entity_id,
            conflict_type = %conflict.conflict_type,
            severity = %conflict.severity,
            "Conflict detected"
        );

        Ok(ConflictRecord {
            id,
            entity_id: conflict.entity_id,
            entity_type: conflict.entity_type,
            conflict_type: conflict.conflict_type,
            severity: conflict.severity,
            status: ConflictStatus::Pending,
            detected_at: entry.timestamp,
            resolved_at: None,
            resolution_strategy: None,
            resolved_by: None,
            justification: None,
            local_version: conflict.local_version,
            remote_version: conflict.remote_version,
            local_data: conflict.local_data,
            remote_data: conflict.remote_data,
            diffs: conflict.diffs,
            audit_trail: vec![entry],
        })
    }

    /// Mark a conflict RESOLVED and append `CONFLICT_RESOLVED`, atomically
    pub async fn update_conflict_resolution(
        &self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        justification: Option<&str>,
    ) -> SyncResult<ConflictRecord> {
        self.apply_resolution(id, strategy, resolved_by, justification, ResolutionEffects::default())
            .await
    }

    /// Resolve a conflict together with the writes the resolution implies
    ///
    /// The conflict is claimed first: `UPDATE ... WHERE status = 'PENDING'`
    /// is the transaction's first statement, so a concurrent resolver waits
    /// for the write lock and then finds it RESOLVED. Record writes, queue
    /// items, the status change and the audit entry commit together or not
    /// at all.
    pub async fn apply_resolution(
        &self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        justification: Option<&str>,
        effects: ResolutionEffects,
    ) -> SyncResult<ConflictRecord> {
        if resolved_by.trim().is_empty() {
            return Err(SyncError::Validation("resolvedBy is required".into()));
        }

        let records = effects
            .records
            .iter()
            .map(|write| -> SyncResult<Option<(String, Option<String>)>> {
                match write {
                    RecordWrite::Save { payload, .. } => {
                        payload.validate()?;
                        self.split_for_storage(payload.kind(), payload).map(Some)
                    }
                    RecordWrite::Delete { .. } => Ok(None),
                }
            })
            .collect::<SyncResult<Vec<_>>>()?;
        let queue = effects
            .queue
            .iter()
            .map(|item| self.seal_queue_payload(item))
            .collect::<SyncResult<Vec<_>>>()?;
        let stamp = self.stamp();

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE conflicts
            SET status = 'RESOLVED',
                resolution_strategy = ?,
                resolved_by = ?,
                justification = ?,
                last_modified = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(strategy.as_str())
        .bind(resolved_by)
        .bind(justification)
        .bind(&stamp.text)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() != 1 {
            let exists: Option<String> = sqlx::query_scalar("SELECT status FROM conflicts WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                None => SyncError::NotFound(format!("conflict {id}")),
                Some(_) => SyncError::InvalidTransition(format!("conflict {id} is already resolved")),
            });
        }

        for (write, sealed) in effects.records.iter().zip(&records) {
            match (write, sealed) {
                (
                    RecordWrite::Save { entity_id, payload, status, server_version },
                    Some((public_data, encrypted_data)),
                ) => {
                    upsert_record(
                        &mut tx,
                        payload.kind(),
                        entity_id,
                        *status,
                        *server_version,
                        (public_data, encrypted_data.as_deref()),
                        &stamp.text,
                    )
                    .await?;
                }
                (RecordWrite::Delete { kind, entity_id }, _) => {
                    sqlx::query(&format!("DELETE FROM {} WHERE entity_id = ?", kind.table()))
                        .bind(entity_id)
                        .execute(&mut *tx)
                        .await?;
                }
                (RecordWrite::Save { entity_id, .. }, None) => {
                    return Err(SyncError::Internal(format!("record {entity_id} was not prepared")));
                }
            }
        }

        for (item, payload) in effects.queue.iter().zip(&queue) {
            let (queue_item_id, _) = self
                .insert_queue_item(&mut tx, item, payload.as_deref(), &stamp.text)
                .await?;
            tracing::debug!(
                conflict_id = %id,
                queue_item_id = %queue_item_id,
                entity_id = %item.entity_id,
                action = %item.action,
                "Queued resolution"
            );
        }

        let trail = load_audit_trail(&mut tx, id).await?;
        let entry = audit::next_entry(
            id,
            trail.last(),
            self.clock.now(),
            AuditAction::ConflictResolved,
            resolved_by,
            json!({
                "strategy": strategy,
                "justification": justification,
            }),
        );
        sqlx::query("UPDATE conflicts SET resolved_at = ? WHERE id = ?")
            .bind(super::format_ts(&entry.timestamp))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        insert_audit_entry(&mut tx, &entry).await?;

        tx.commit().await?;

        tracing::info!(
            conflict_id = %id,
            strategy = %strategy,
            record_writes = effects.records.len(),
            queued = effects.queue.len(),
            "Conflict resolved"
        );

        self.get_conflict(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("conflict {id}")))
    }

    pub async fn get_conflict(&self, id: Uuid) -> SyncResult<Option<ConflictRecord>> {
        let row = sqlx::query(&format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.decode_conflict(&row).await?)),
            None => Ok(None),
        }
    }

    /// Pending conflicts matching every set filter, newest detected first
    pub async fn get_pending_conflicts(&self, filter: &ConflictFilter) -> SyncResult<Vec<ConflictRecord>> {
        let mut sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE status = 'PENDING'");
        if filter.entity_type.is_some() {
            sql.push_str(" AND entity_type = ?");
        }
        if filter.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if filter.conflict_type.is_some() {
            sql.push_str(" AND conflict_type = ?");
        }
        sql.push_str(" ORDER BY detected_at DESC, rowid DESC");

        let mut query = sqlx::query(&sql);
        if let Some(kind) = filter.entity_type {
            query = query.bind(kind.as_str());
        }
        if let Some(severity) = filter.severity {
            query = query.bind(severity.as_str());
        }
        if let Some(conflict_type) = filter.conflict_type {
            query = query.bind(conflict_type.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        self.decode_conflicts(&rows).await
    }

    /// Every conflict on an entity id, any kind or status, newest first
    pub async fn get_conflicts_for_entity(&self, entity_id: &str) -> SyncResult<Vec<ConflictRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE entity_id = ? ORDER BY detected_at DESC, rowid DESC"
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        self.decode_conflicts(&rows).await
    }

    /// All conflicts, optionally of one status, newest first
    pub async fn list_conflicts(&self, status: Option<ConflictStatus>) -> SyncResult<Vec<ConflictRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE status = ? ORDER BY detected_at DESC, rowid DESC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts ORDER BY detected_at DESC, rowid DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        self.decode_conflicts(&rows).await
    }

    pub async fn conflict_stats(&self) -> SyncResult<ConflictStats> {
        let rows = sqlx::query(
            "SELECT status, conflict_type, severity, COUNT(*) AS n FROM conflicts GROUP BY status, conflict_type, severity",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ConflictStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let conflict_type: String = row.try_get("conflict_type")?;
            let severity: String = row.try_get("severity")?;
            let n = to_u64(row.try_get("n")?);

            stats.total += n;
            *stats.by_status.entry(ConflictStatus::from_str(&status)?).or_default() += n;
            *stats.by_type.entry(ConflictType::from_str(&conflict_type)?).or_default() += n;
            *stats.by_severity.entry(ConflictSeverity::from_str(&severity)?).or_default() += n;
        }
        Ok(stats)
    }

    pub async fn audit_trail(&self, conflict_id: Uuid) -> SyncResult<Vec<ConflictAuditEntry>> {
        let mut conn = self.pool.acquire().await?;
        load_audit_trail(&mut conn, conflict_id).await
    }

    /// Re-check the stored hash chain of one conflict
    pub async fn verify_audit_trail(&self, conflict_id: Uuid) -> SyncResult<AuditVerification> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM conflicts WHERE id = ?")
            .bind(conflict_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(SyncError::NotFound(format!("conflict {conflict_id}")));
        }

        let trail = self.audit_trail(conflict_id).await?;
        let verification = audit::verify_chain(conflict_id, &trail);
        if !verification.valid {
            tracing::error!(
                conflict_id = %conflict_id,
                sequence = ?verification.first_invalid_sequence,
                reason = ?verification.reason,
                "Audit trail verification failed"
            );
        }
        Ok(verification)
    }

    async fn decode_conflicts(&self, rows: &[SqliteRow]) -> SyncResult<Vec<ConflictRecord>> {
        let mut conflicts = Vec::with_capacity(rows.len());
        for row in rows {
            conflicts.push(self.decode_conflict(row).await?);
        }
        Ok(conflicts)
    }

    async fn decode_conflict(&self, row: &SqliteRow) -> SyncResult<ConflictRecord> {
        let id: String = row.try_get("id")?;
        let entity_type: String = row.try_get("entity_type")?;
        let conflict_type: String = row.try_get("conflict_type")?;
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;
        let detected_at: String = row.try_get("detected_at")?;
        let strategy: Option<String> = row.try_get("resolution_strategy")?;
        let data: String = row.try_get("data")?;

        let id = parse_uuid(&id)?;
        let data: ConflictData = serde_json::from_value(self.open_json(&data)?)?;
        let audit_trail = self.audit_trail(id).await?;

        Ok(ConflictRecord {
            id,
            entity_id: row.try_get("entity_id")?,
            entity_type: EntityKind::from_str(&entity_type)?,
            conflict_type: ConflictType::from_str(&conflict_type)?,
            severity: ConflictSeverity::from_str(&severity)?,
            status: ConflictStatus::from_str(&status)?,
            detected_at: parse_ts(&detected_at)?,
            resolved_at: parse_opt_ts(row.try_get("resolved_at")?)?,
            resolution_strategy: strategy
                .as_deref()
                .map(ResolutionStrategy::from_str)
                .transpose()?,
            resolved_by: row.try_get("resolved_by")?,
            justification: row.try_get("justification")?,
            local_version: row.try_get("local_version")?,
            remote_version: row.try_get("remote_version")?,
            local_data: data.local_data,
            remote_data: data.remote_data,
            diffs: data.diffs,
            audit_trail,
        })
    }
}

async fn insert_audit_entry(conn: &mut SqliteConnection, entry: &ConflictAuditEntry) -> SyncResult<()> {
    sqlx::query(
        r#"
        INSERT INTO conflict_audit (
            conflict_id, sequence, timestamp, action, performed_by,
            details, prev_hash, entry_hash
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.conflict_id.to_string())
    .bind(entry.sequence)
    .bind(super::format_ts(&entry.timestamp))
    .bind(entry.action.as_str())
    .bind(&entry.performed_by)
    .bind(entry.details.to_string())
    .bind(&entry.prev_hash)
    .bind(&entry.entry_hash)
    .execute(conn)
    .await?;

    Ok(())
}

async fn load_audit_trail(conn: &mut SqliteConnection, conflict_id: Uuid) -> SyncResult<Vec<ConflictAuditEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT conflict_id, sequence, timestamp, action, performed_by, details, prev_hash, entry_hash
        FROM conflict_audit
        WHERE conflict_id = ?
        ORDER BY sequence ASC
        "#,
    )
    .bind(conflict_id.to_string())
    .fetch_all(conn)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let conflict_id: String = row.try_get("conflict_id")?;
        let timestamp: String = row.try_get("timestamp")?;
        let action: String = row.try_get("action")?;
        let details: String = row.try_get("details")?;

        entries.push(ConflictAuditEntry {
            sequence: row.try_get("sequence")?,
            conflict_id: parse_uuid(&conflict_id)?,
            timestamp: parse_ts(&timestamp)?,
            action: AuditAction::from_str(&action)?,
            performed_by: row.try_get("performed_by")?,
            details: serde_json::from_str(&details)?,
            prev_hash: row.try_get("prev_hash")?,
            entry_hash: row.try_get("entry_hash")?,
        });
    }
    Ok(entries)
}
