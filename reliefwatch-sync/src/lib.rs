//! Offline-first synchronization core for ReliefWatch field data
//!
//! Provides:
//! - Local SQLite store with per-user encryption of sensitive fields
//! - Durable sync queue ordered by a configurable priority score
//! - Optimistic updates with retry, backoff and rollback
//! - Conflict detection, field diffs and a hash-chained audit trail
//! - The [`SyncEngine`] that drives all of the above against the server
//!
//! ```no_run
//! # async fn run() -> reliefwatch_sync::SyncResult<()> {
//! use reliefwatch_sync::{
//!     HttpRemoteApi, LocalDatabase, Session, StaticSessionProvider, SyncEngine, SyncSettings,
//!     SystemClock,
//! };
//! use std::sync::Arc;
//!
//! let settings = SyncSettings::default();
//! let clock = Arc::new(SystemClock);
//! let db = LocalDatabase::open(settings.database.clone(), settings.sensitivity.clone(), clock.clone()).await?;
//! let remote = Arc::new(HttpRemoteApi::new(&settings.remote)?);
//!
//! let engine = SyncEngine::new(Arc::new(db), remote, clock, settings);
//! engine.start_session(&StaticSessionProvider::new(Session::new("amina", "token"))).await?;
//! let report = engine.process_queue().await?;
//! println!("synced {} of {}", report.synced, report.attempted);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod conflict_resolution;
pub mod engine;
pub mod error;
pub mod local_db;
pub mod models;
pub mod optimistic;
pub mod priority;
pub mod record_encryption;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use audit::AuditVerification;
pub use config::{SyncOptions, SyncSettings};
pub use conflict_resolution::{ConflictDetector, ConflictResolver, ServerState, SeverityPolicy};
pub use engine::{ProcessReport, SyncEngine, ENGINE_ACTOR};
pub use error::{SyncConflictError, SyncError, SyncResult, SyncTransientError};
pub use local_db::{
    CacheTable, CleanupReport, LocalDatabase, LocalDbConfig, RecordWrite, ResolutionEffects, RetentionPolicy,
};
pub use optimistic::{OptimisticUpdateManager, UpdateCallbacks};
pub use priority::{PriorityAssigner, PriorityWeights, ScoreBreakdown};
pub use record_encryption::{KeyVault, RecordCipher, SensitivityPolicy};
pub use remote::{HttpRemoteApi, RemoteConfig, RemoteError, RemoteMutation, RemoteMutationApi, ServerAck};
pub use scheduler::{CancellationToken, Clock, ManualClock, SystemClock};
pub use session::{Session, SessionProvider, StaticSessionProvider};
pub use stats::{ConflictStats, EngineStats, QueueStats, UpdateStats};
