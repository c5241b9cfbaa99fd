//! Properties that hold for any input

mod common;

use common::*;
use proptest::prelude::*;
use reliefwatch_sync::models::{
    EntityKind, MutationAction, NewQueueItem, PriorityRule, PriorityTier, QueueItem,
    RuleCondition, RuleOperator, UpdateStatus,
};
use reliefwatch_sync::priority::{self, MAX_SCORE};
use reliefwatch_sync::{
    ManualClock, OptimisticUpdateManager, RecordCipher, SyncError, UpdateCallbacks,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn tier() -> impl Strategy<Value = PriorityTier> {
    prop_oneof![
        Just(PriorityTier::High),
        Just(PriorityTier::Normal),
        Just(PriorityTier::Low),
    ]
}

fn rule() -> impl Strategy<Value = PriorityRule> {
    (
        -150i32..150,
        any::<bool>(),
        prop_oneof![Just("CAMP"), Just("SCHOOL"), Just("CLINIC")],
    )
        .prop_map(|(modifier, active, entity_type)| PriorityRule {
            id: format!("rule-{modifier}"),
            name: format!("{entity_type} adjustment"),
            entity_type: EntityKind::Assessment,
            conditions: vec![RuleCondition {
                field: "notes".to_string(),
                operator: RuleOperator::Contains,
                value: Value::from(entity_type.to_lowercase()),
            }],
            priority_modifier: modifier,
            is_active: active,
        })
}

fn queued(notes: &str, tier: PriorityTier, age_minutes: i64) -> QueueItem {
    let created = start_time() - chrono::Duration::minutes(age_minutes);
    NewQueueItem::new(
        EntityKind::Assessment,
        MutationAction::Create,
        "assessment-1",
        Some(health_assessment(notes)),
        tier,
    )
    .preview(created)
}

proptest! {
    #[test]
    fn score_is_deterministic_and_bounded(
        notes in "[a-z ]{0,60}",
        tier in tier(),
        age in 0i64..10_000,
        rules in prop::collection::vec(rule(), 0..6),
    ) {
        let item = queued(&notes, tier, age);

        let first = priority::score_at(&item, &rules, start_time());
        let second = priority::score_at(&item, &rules, start_time());

        prop_assert_eq!(first, second);
        prop_assert!(first <= MAX_SCORE);
    }

    #[test]
    fn rollback_restores_original_after_any_retry_count(retries in 0u32..=3) {
        let clock = Arc::new(ManualClock::new(start_time()));
        let manager = OptimisticUpdateManager::new(3, Duration::from_millis(1000), clock);

        let id = manager
            .apply_optimistic_update(
                EntityKind::Entity,
                "camp-7",
                MutationAction::Update,
                Some(camp("Renamed")),
                Some(camp("Original")),
                UpdateCallbacks::new(),
            )
            .unwrap();

        manager.fail(id, "offline").unwrap();
        for _ in 0..retries {
            manager.begin_retry(id).unwrap();
            manager.fail(id, "still offline").unwrap();
        }

        let rolled_back = manager.rollback(id).unwrap();
        prop_assert_eq!(rolled_back.status, UpdateStatus::RolledBack);
        prop_assert_eq!(rolled_back.retry_count, retries);
        prop_assert_eq!(rolled_back.original_data.clone(), Some(camp("Original")));
        prop_assert_eq!(
            manager.entity_state(EntityKind::Entity, "camp-7"),
            Some(Some(camp("Original")))
        );
    }

    #[test]
    fn sealed_records_open_only_with_their_key(
        name in "[A-Za-z ]{1,40}",
        population in 0u64..1_000_000,
    ) {
        let value = json!({"name": name, "population": population, "id": Uuid::new_v4()});
        let key = RecordCipher::generate().unwrap();
        let other = RecordCipher::generate().unwrap();

        let blob = key.encrypt(&value).unwrap();

        prop_assert!(!blob.contains(&name));
        prop_assert_eq!(key.decrypt(&blob).unwrap(), value);
        prop_assert!(matches!(other.decrypt(&blob), Err(SyncError::Decryption(_))));
    }
}
