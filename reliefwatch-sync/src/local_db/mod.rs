//! Local SQLite database for offline-first operations
//!
//! Provides:
//! - Field records per entity kind, sensitive fields encrypted at rest
//! - Drafts of unsubmitted forms
//! - The durable sync queue
//! - Conflict records with their hash-chained audit trail
//! - Wrapped per-user data keys
//! - TTL caches for query results and map tiles
//!
//! Every write stamps `last_modified` from the injected [`Clock`] in Rust,
//! there are no triggers.

mod cache;
mod cleanup;
mod conflicts;
mod drafts;
mod keys;
mod queue;
mod records;

pub use cache::CacheTable;
pub use cleanup::{CleanupReport, RetentionPolicy};
pub use conflicts::{RecordWrite, ResolutionEffects};
pub use queue::QueueScan;

use crate::error::{SyncError, SyncResult};
use crate::models::EntityKind;
use crate::record_encryption::{KeySlot, SensitivityPolicy};
use crate::scheduler::Clock;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Marks a text column holding a sealed JSON document
const SEALED_PREFIX: &str = "ENC:";

/// Configuration for local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Device profile; keys are held per (profile, user)
    pub profile: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Whether to overwrite freed pages on delete
    pub enable_secure_delete: bool,
    pub busy_timeout_ms: u64,
    /// Queue writes beyond this many items fail with `StorageQuota`
    pub max_queue_items: usize,
    /// Device secret file, `{db_path}.key` when unset
    pub key_file: Option<PathBuf>,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("reliefwatch_local.db"),
            profile: "default".to_string(),
            max_connections: 5,
            enable_wal: true,
            enable_secure_delete: true,
            busy_timeout_ms: 5_000,
            max_queue_items: 10_000,
            key_file: None,
        }
    }
}

impl LocalDbConfig {
    pub fn key_file_path(&self) -> PathBuf {
        self.key_file.clone().unwrap_or_else(|| {
            let mut path = self.db_path.clone().into_os_string();
            path.push(".key");
            PathBuf::from(path)
        })
    }
}

/// A write timestamp, truncated to the millisecond precision stored in SQLite
#[derive(Debug, Clone)]
pub(crate) struct Stamp {
    pub at: DateTime<Utc>,
    pub text: String,
}

impl Stamp {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        let at = truncate_millis(now);
        Self {
            text: format_ts(&at),
            at,
        }
    }
}

/// Local database handle
pub struct LocalDatabase {
    pool: SqlitePool,
    config: LocalDbConfig,
    sensitivity: SensitivityPolicy,
    clock: Arc<dyn Clock>,
    key_slot: KeySlot,
}

impl LocalDatabase {
    /// Open (creating if needed) the database and its schema
    pub async fn open(
        config: LocalDbConfig,
        sensitivity: SensitivityPolicy,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        // Pragmas go on the connect options so every pooled connection gets them
        let mut options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        if config.enable_wal {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        if config.enable_secure_delete {
            options = options.pragma("secure_delete", "ON");
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            config,
            sensitivity,
            clock,
            key_slot: KeySlot::default(),
        };
        db.initialize_schema().await?;

        tracing::info!(
            db_path = %db.config.db_path.display(),
            profile = %db.config.profile,
            "Opened local database"
        );

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> SyncResult<()> {
        for kind in EntityKind::ALL {
            let table = kind.table();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    entity_id TEXT PRIMARY KEY,
                    sync_status TEXT NOT NULL,
                    server_version INTEGER,
                    public_data TEXT NOT NULL,
                    encrypted_data TEXT,
                    created_at TEXT NOT NULL,
                    last_modified TEXT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_status_modified ON {table}(sync_status, last_modified)"
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_modified TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_drafts_type ON drafts(entity_type, last_modified)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                entity_type TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT,
                priority TEXT NOT NULL,
                priority_score INTEGER NOT NULL DEFAULT 0,
                priority_reason TEXT NOT NULL DEFAULT '',
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt TEXT,
                last_modified TEXT NOT NULL,
                last_error TEXT,
                base_version INTEGER,
                update_id TEXT,
                unreadable INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_update ON sync_queue(update_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                conflict_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                resolved_at TEXT,
                resolution_strategy TEXT,
                resolved_by TEXT,
                justification TEXT,
                local_version INTEGER,
                remote_version INTEGER,
                data TEXT NOT NULL,
                last_modified TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status, detected_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conflicts_entity ON conflicts(entity_type, entity_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conflict_audit (
                conflict_id TEXT NOT NULL REFERENCES conflicts(id) ON DELETE CASCADE,
                sequence INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                details TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL,
                PRIMARY KEY (conflict_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS key_store (
                profile TEXT NOT NULL,
                user_id TEXT NOT NULL,
                wrapped_key TEXT NOT NULL,
                salt TEXT NOT NULL,
                key_version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (profile, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for table in CacheTable::ALL {
            let table = table.table();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    cache_key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_expires ON {table}(expires_at)"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &LocalDbConfig {
        &self.config
    }

    pub fn sensitivity(&self) -> &SensitivityPolicy {
        &self.sensitivity
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn key_slot(&self) -> &KeySlot {
        &self.key_slot
    }

    /// Close the pool after dropping the session key
    pub async fn close(&self) {
        self.key_slot.clear();
        self.pool.close().await;
    }

    pub(crate) fn stamp(&self) -> Stamp {
        Stamp::new(self.clock.now())
    }

    /// Serialize a document for a text column, sealing it for sensitive kinds
    pub(crate) fn seal_json(&self, kind: EntityKind, value: &Value) -> SyncResult<String> {
        if self.sensitivity.requires_encryption(kind) {
            let cipher = self.key_slot.current()?;
            Ok(format!("{SEALED_PREFIX}{}", cipher.encrypt(value)?))
        } else {
            Ok(serde_json::to_string(value)?)
        }
    }

    /// Inverse of [`LocalDatabase::seal_json`]
    pub(crate) fn open_json(&self, text: &str) -> SyncResult<Value> {
        match text.strip_prefix(SEALED_PREFIX) {
            Some(blob) => self.key_slot.current()?.decrypt(blob),
            None => Ok(serde_json::from_str(text)?),
        }
    }
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(at)
}

/// RFC 3339 with millisecond precision and `Z`, so text order is time order
pub(crate) fn format_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(text: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp '{text}': {e}")))
}

pub(crate) fn parse_opt_ts(text: Option<String>) -> SyncResult<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_uuid(text: &str) -> SyncResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| SyncError::Internal(format!("Invalid UUID '{text}': {e}")))
}

pub(crate) fn to_u32(value: i64, column: &str) -> SyncResult<u32> {
    u32::try_from(value).map_err(|_| SyncError::Internal(format!("{column} out of range: {value}")))
}

pub(crate) fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::record_encryption::RecordCipher;
    use crate::scheduler::ManualClock;
    use tempfile::TempDir;

    pub struct TestDb {
        pub db: Arc<LocalDatabase>,
        pub clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    pub fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 6, 0, 0).unwrap()
    }

    pub async fn open_with(config: impl FnOnce(&mut LocalDbConfig)) -> TestDb {
        let dir = TempDir::new().unwrap();
        let mut cfg = LocalDbConfig {
            db_path: dir.path().join("field.db"),
            ..LocalDbConfig::default()
        };
        config(&mut cfg);

        let clock = Arc::new(ManualClock::new(start_time()));
        let db = LocalDatabase::open(cfg, SensitivityPolicy::default(), clock.clone())
            .await
            .unwrap();
        db.key_slot().install(RecordCipher::generate().unwrap());

        TestDb {
            db: Arc::new(db),
            clock,
            _dir: dir,
        }
    }

    pub async fn open() -> TestDb {
        open_with(|_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let t = open().await;
        t.db.initialize_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_pragmas_applied() {
        let t = open().await;
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(t.db.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(t.db.pool())
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_seal_json_only_for_sensitive_kinds() {
        let t = open().await;
        let value = json!({"notes": "cholera suspected"});

        let sealed = t.db.seal_json(EntityKind::Assessment, &value).unwrap();
        assert!(sealed.starts_with(SEALED_PREFIX));
        assert!(!sealed.contains("cholera"));
        assert_eq!(t.db.open_json(&sealed).unwrap(), value);

        let plain = t.db.seal_json(EntityKind::Media, &value).unwrap();
        assert!(plain.contains("cholera"));
        assert_eq!(t.db.open_json(&plain).unwrap(), value);
    }

    #[tokio::test]
    async fn test_seal_without_key_is_unavailable() {
        let t = open().await;
        t.db.key_slot().clear();
        assert!(matches!(
            t.db.seal_json(EntityKind::Incident, &json!({})),
            Err(SyncError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_timestamp_text_orders_like_time() {
        let a = start_time();
        let b = a + chrono::Duration::milliseconds(1);
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&a)).unwrap(), a);
    }

    #[test]
    fn test_default_key_file_sits_next_to_database() {
        let config = LocalDbConfig {
            db_path: PathBuf::from("/data/field.db"),
            ..LocalDbConfig::default()
        };
        assert_eq!(config.key_file_path(), PathBuf::from("/data/field.db.key"));
    }
}
