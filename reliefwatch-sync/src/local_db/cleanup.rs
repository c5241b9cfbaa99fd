//! Retention-based eviction
//!
//! Only SYNCED records, drafts, RESOLVED conflicts and expired cache rows
//! are ever removed. Anything still waiting for the server stays.

use super::{format_ts, CacheTable, LocalDatabase};
use crate::error::SyncResult;
use crate::models::EntityKind;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-table retention windows, in days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Synced assessments, responses, incidents and media
    pub synced_record_days: u32,
    pub synced_entity_days: u32,
    pub draft_days: u32,
    /// Resolved conflicts, together with their audit rows
    pub resolved_conflict_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            synced_record_days: 30,
            synced_entity_days: 90,
            draft_days: 30,
            resolved_conflict_days: 90,
        }
    }
}

impl RetentionPolicy {
    pub fn record_days(&self, kind: EntityKind) -> u32 {
        match kind {
            EntityKind::Entity => self.synced_entity_days,
            _ => self.synced_record_days,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub records: BTreeMap<EntityKind, u64>,
    pub drafts: u64,
    pub conflicts: u64,
    pub audit_entries: u64,
    pub cache_rows: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.records.values().sum::<u64>()
            + self.drafts
            + self.conflicts
            + self.audit_entries
            + self.cache_rows
    }
}

impl LocalDatabase {
    /// Evict everything older than its retention window
    pub async fn cleanup(&self, policy: &RetentionPolicy) -> SyncResult<CleanupReport> {
        let now = self.clock.now();
        let cutoff = |days: u32| format_ts(&(now - Duration::days(i64::from(days))));
        let mut report = CleanupReport::default();

        for kind in EntityKind::ALL {
            let table = kind.table();
            let removed = sqlx::query(&format!(
                "DELETE FROM {table} WHERE sync_status = 'SYNCED' AND last_modified < ?"
            ))
            .bind(cutoff(policy.record_days(*kind)))
            .execute(&self.pool)
            .await?
            .rows_affected();
            if removed > 0 {
                report.records.insert(*kind, removed);
            }
        }

        report.drafts = sqlx::query("DELETE FROM drafts WHERE last_modified < ?")
            .bind(cutoff(policy.draft_days))
            .execute(&self.pool)
            .await?
            .rows_affected();

        let conflict_cutoff = cutoff(policy.resolved_conflict_days);
        let mut tx = self.pool.begin().await?;
        report.audit_entries = sqlx::query(
            r#"
            DELETE FROM conflict_audit WHERE conflict_id IN (
                SELECT id FROM conflicts WHERE status = 'RESOLVED' AND resolved_at < ?
            )
            "#,
        )
        .bind(&conflict_cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        report.conflicts = sqlx::query("DELETE FROM conflicts WHERE status = 'RESOLVED' AND resolved_at < ?")
            .bind(&conflict_cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        let now_text = format_ts(&now);
        for table in CacheTable::ALL {
            let name = table.table();
            report.cache_rows += sqlx::query(&format!("DELETE FROM {name} WHERE expires_at <= ?"))
                .bind(&now_text)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }

        tracing::info!(
            records = report.records.values().sum::<u64>(),
            drafts = report.drafts,
            conflicts = report.conflicts,
            audit_entries = report.audit_entries,
            cache_rows = report.cache_rows,
            "Local store cleanup finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::open;
    use super::*;
    use crate::models::payload::fixtures::{assessment, entity};
    use crate::models::{ConflictSeverity, ConflictType, NewConflict, RecordSyncStatus, ResolutionStrategy};
    use serde_json::json;

    #[tokio::test]
    async fn test_only_synced_records_past_window_are_evicted() {
        let t = open().await;
        let policy = RetentionPolicy::default();

        t.db.save_record("a-synced", &assessment("old"), RecordSyncStatus::Synced, Some(1))
            .await
            .unwrap();
        t.db.save_record("a-pending", &assessment("old"), RecordSyncStatus::Pending, None)
            .await
            .unwrap();
        t.db.save_record("e-synced", &entity("Camp"), RecordSyncStatus::Synced, Some(1))
            .await
            .unwrap();

        t.clock.advance(Duration::days(40));
        let report = t.db.cleanup(&policy).await.unwrap();

        assert_eq!(report.records.get(&EntityKind::Assessment), Some(&1));
        assert!(t.db.get_record(EntityKind::Assessment, "a-synced").await.unwrap().is_none());
        assert!(t.db.get_record(EntityKind::Assessment, "a-pending").await.unwrap().is_some());
        // Entities have the longer window
        assert!(t.db.get_record(EntityKind::Entity, "e-synced").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolved_conflicts_evicted_with_audit_rows() {
        let t = open().await;
        let new = |id: &str| NewConflict {
            entity_id: id.to_string(),
            entity_type: EntityKind::Media,
            conflict_type: ConflictType::VersionMismatch,
            severity: ConflictSeverity::Low,
            local_version: Some(1),
            remote_version: Some(2),
            local_data: Some(json!({})),
            remote_data: Some(json!({})),
            diffs: vec![],
            detected_by: "sync-engine".into(),
        };

        let resolved = t.db.create_conflict(new("m-1")).await.unwrap();
        t.db.update_conflict_resolution(resolved.id, ResolutionStrategy::AcceptRemote, "ops", None)
            .await
            .unwrap();
        let pending = t.db.create_conflict(new("m-2")).await.unwrap();

        t.clock.advance(Duration::days(91));
        let report = t.db.cleanup(&RetentionPolicy::default()).await.unwrap();

        assert_eq!(report.conflicts, 1);
        assert_eq!(report.audit_entries, 2);
        assert!(t.db.get_conflict(resolved.id).await.unwrap().is_none());
        assert!(t.db.get_conflict(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_cache_and_old_drafts() {
        let t = open().await;
        t.db.save_draft(None, None, &assessment("draft")).await.unwrap();
        t.db.cache_put(CacheTable::Query, "k", &json!(1), std::time::Duration::from_secs(60))
            .await
            .unwrap();

        t.clock.advance(Duration::days(31));
        let report = t.db.cleanup(&RetentionPolicy::default()).await.unwrap();
        assert_eq!(report.drafts, 1);
        assert_eq!(report.cache_rows, 1);
        assert_eq!(report.total(), 2);
    }
}
