#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reliefwatch_sync::models::{
    AssessmentPayload, AssessmentType, EntityPayload, MutationPayload, PriorityTier,
};
use reliefwatch_sync::{
    KeyVault, LocalDatabase, LocalDbConfig, ManualClock, RemoteError, RemoteMutation,
    RemoteMutationApi, SensitivityPolicy, ServerAck, Session, StaticSessionProvider, SyncEngine,
    SyncSettings,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

mockall::mock! {
    pub Remote {}

    #[async_trait]
    impl RemoteMutationApi for Remote {
        async fn submit(&self, mutation: &RemoteMutation) -> Result<ServerAck, RemoteError>;
    }
}

pub struct Harness {
    pub db: Arc<LocalDatabase>,
    pub clock: Arc<ManualClock>,
    pub settings: SyncSettings,
    _dir: TempDir,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 6, 0, 0).unwrap()
}

/// Fresh database in a temp dir with the field user's key installed
pub async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut settings = SyncSettings::default();
    settings.database = LocalDbConfig {
        db_path: dir.path().join("field.db"),
        ..LocalDbConfig::default()
    };

    let clock = Arc::new(ManualClock::new(start_time()));
    let db = LocalDatabase::open(settings.database.clone(), SensitivityPolicy::default(), clock.clone())
        .await
        .unwrap();
    KeyVault::for_database(&db).open_session(&db, "amina").await.unwrap();

    Harness {
        db: Arc::new(db),
        clock,
        settings,
        _dir: dir,
    }
}

impl Harness {
    pub async fn engine(&self, remote: MockRemote) -> SyncEngine {
        let engine = SyncEngine::new(
            self.db.clone(),
            Arc::new(remote),
            self.clock.clone(),
            self.settings.clone(),
        );
        engine
            .start_session(&StaticSessionProvider::new(Session::new("amina", "field-token")))
            .await
            .unwrap();
        engine
    }
}

pub fn camp(name: &str) -> MutationPayload {
    MutationPayload::Entity(EntityPayload {
        name: name.to_string(),
        entity_type: "CAMP".to_string(),
        lga: Some("Jere".to_string()),
        ward: Some("Gongulong".to_string()),
        population: Some(850),
        location: None,
        contact: None,
    })
}

pub fn camp_name(payload: &MutationPayload) -> &str {
    match payload {
        MutationPayload::Entity(e) => &e.name,
        other => panic!("expected an entity payload, got {other:?}"),
    }
}

pub fn health_assessment(notes: &str) -> MutationPayload {
    MutationPayload::Assessment(AssessmentPayload {
        assessment_type: AssessmentType::Health,
        affected_entity_id: "camp-7".to_string(),
        assessor_name: "Musa Ibrahim".to_string(),
        date: start_time(),
        severity: None,
        affected_population: None,
        notes: Some(notes.to_string()),
        location: None,
        details: BTreeMap::new(),
    })
}

pub const HIGH: PriorityTier = PriorityTier::High;
pub const NORMAL: PriorityTier = PriorityTier::Normal;
