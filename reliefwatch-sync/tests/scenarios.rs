//! End-to-end flows through the engine against a mocked sync API

mod common;

use common::*;
use reliefwatch_sync::models::{
    AuditAction, ConflictFilter, ConflictStatus, EntityKind, MutationAction, NewQueueItem,
    RecordFilter, RecordSyncStatus, UpdateStatus,
};
use reliefwatch_sync::{
    priority, CleanupReport, PriorityAssigner, PriorityWeights, RemoteError, RetentionPolicy,
    SyncError, UpdateCallbacks,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_high_priority_cholera_assessment_scores_at_least_fifty() {
    let item = NewQueueItem::new(
        EntityKind::Assessment,
        MutationAction::Create,
        "a-1",
        Some(health_assessment("Suspected cholera cases near the borehole")),
        HIGH,
    )
    .preview(start_time());

    let assigner = PriorityAssigner::new(PriorityWeights::default());
    let score = assigner.score_at(&item, &[], start_time());
    assert!(score >= 50, "score was {score}");
    assert_eq!(priority::score_at(&item, &[], start_time()), score);

    let reason = assigner.generate_reason_at(&item, &[], start_time());
    assert!(reason.contains("health keywords"));
}

#[tokio::test]
async fn test_failed_update_is_rolled_back_after_retries_are_exhausted() {
    let h = harness().await;
    h.db.save_record("e1", &camp("A"), RecordSyncStatus::Synced, Some(1))
        .await
        .unwrap();

    let mut remote = MockRemote::new();
    remote
        .expect_submit()
        .times(4)
        .returning(|_| Err(RemoteError::Transient("gateway timeout".into())));
    let engine = h.engine(remote).await;

    let rollbacks = Arc::new(AtomicUsize::new(0));
    let counter = rollbacks.clone();
    let id = engine
        .apply_optimistic_update(
            EntityKind::Entity,
            "e1",
            MutationAction::Update,
            Some(camp("B")),
            NORMAL,
            UpdateCallbacks::new().on_rollback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    let projected = engine.updates().entity_state(EntityKind::Entity, "e1").unwrap().unwrap();
    assert_eq!(camp_name(&projected), "B");

    assert_eq!(engine.process_queue().await.unwrap().failed, 1);
    for _ in 0..3 {
        let update = engine.retry_update(id).await.unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
    }

    let update = engine.updates().get(id).unwrap();
    assert_eq!(update.retry_count, 3);
    assert!(matches!(
        engine.retry_update(id).await,
        Err(SyncError::RetriesExhausted { retry_count: 3, .. })
    ));
    assert_eq!(engine.stats().await.unwrap().queue.exhausted, 1);

    let rolled_back = engine.rollback_update(id).await.unwrap();
    assert_eq!(rolled_back.status, UpdateStatus::RolledBack);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);

    let record = h.db.get_record(EntityKind::Entity, "e1").await.unwrap().unwrap();
    assert_eq!(camp_name(&record.payload), "A");
    assert_eq!(record.sync_status, RecordSyncStatus::Synced);
    assert_eq!(h.db.queue_len().await.unwrap(), 0);

    let projected = engine.updates().entity_state(EntityKind::Entity, "e1").unwrap().unwrap();
    assert_eq!(camp_name(&projected), "A");
}

#[tokio::test]
async fn test_terminal_updates_reject_retry_and_rollback() {
    let h = harness().await;
    let mut remote = MockRemote::new();
    remote
        .expect_submit()
        .returning(|m| Ok(reliefwatch_sync::ServerAck { version: m.base_version.unwrap_or(0) + 1, data: None }));
    let engine = h.engine(remote).await;

    let id = engine
        .apply_optimistic_update(EntityKind::Entity, "e9", MutationAction::Create, Some(camp("Dalori")), NORMAL, UpdateCallbacks::new())
        .await
        .unwrap();
    engine.process_queue().await.unwrap();
    assert_eq!(engine.updates().get(id).unwrap().status, UpdateStatus::Confirmed);

    assert!(matches!(engine.retry_update(id).await, Err(SyncError::InvalidTransition(_))));
    assert!(matches!(engine.rollback_update(id).await, Err(SyncError::InvalidTransition(_))));
    assert_eq!(engine.updates().get(id).unwrap().status, UpdateStatus::Confirmed);
}

#[tokio::test]
async fn test_version_disagreement_creates_exactly_one_conflict() {
    let h = harness().await;
    h.db.save_record("e1", &camp("A"), RecordSyncStatus::Synced, Some(1))
        .await
        .unwrap();

    let mut remote = MockRemote::new();
    remote.expect_submit().times(2).returning(|_| {
        Err(RemoteError::VersionConflict {
            server_version: Some(2),
            server_data: Some(serde_json::json!({"name": "A2", "entityType": "CAMP"})),
            deleted: false,
        })
    });
    let engine = h.engine(remote).await;

    for name in ["B", "C"] {
        engine
            .apply_optimistic_update(EntityKind::Entity, "e1", MutationAction::Update, Some(camp(name)), NORMAL, UpdateCallbacks::new())
            .await
            .unwrap();
    }

    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.conflicts, 2);
    assert_eq!(h.db.queue_len().await.unwrap(), 0);

    let pending = engine.get_pending_conflicts(&ConflictFilter::default()).await.unwrap();
    assert_eq!(pending.len(), 1);
    let conflict = &pending[0];
    assert_eq!(conflict.status, ConflictStatus::Pending);
    assert_eq!(conflict.local_version, Some(1));
    assert_eq!(conflict.remote_version, Some(2));
    assert_eq!(conflict.audit_trail.len(), 1);
    assert_eq!(conflict.audit_trail[0].action, AuditAction::ConflictDetected);
    assert!(conflict.diffs.iter().any(|d| d.field_path == "name"));
    // The second attempt carries the newest local edit
    assert_eq!(
        conflict.local_data.as_ref().and_then(|d| d.get("name")),
        Some(&serde_json::json!("C"))
    );

    let record = h.db.get_record(EntityKind::Entity, "e1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, RecordSyncStatus::Conflict);
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.conflicts.by_status.get(&ConflictStatus::Pending), Some(&1));
}

#[tokio::test]
async fn test_cleanup_evicts_old_synced_but_keeps_pending() {
    let h = harness().await;
    h.db.save_record("old-synced", &health_assessment("latrines repaired"), RecordSyncStatus::Synced, Some(4))
        .await
        .unwrap();
    h.db.save_record("old-pending", &health_assessment("awaiting upload"), RecordSyncStatus::Pending, None)
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::days(40));
    let report: CleanupReport = h.db.cleanup(&RetentionPolicy::default()).await.unwrap();

    assert_eq!(report.records.get(&EntityKind::Assessment), Some(&1));
    let remaining = h
        .db
        .query_records(&RecordFilter::new(EntityKind::Assessment))
        .await
        .unwrap();
    let ids: Vec<&str> = remaining.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["old-pending"]);
}
