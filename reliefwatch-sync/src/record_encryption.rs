//! Encryption of sensitive record fields at rest
//!
//! # Security Model
//!
//! - One data key per (profile, user), generated on first session
//! - The data key is persisted only wrapped under a KEK derived with
//!   HKDF-SHA256 from the device secret, a per-user salt and the user id
//! - The device secret lives in a key file with owner-only permissions
//!   next to the database
//! - While no session is open the key slot is empty and every read or
//!   write of a sensitive record fails with `KeyUnavailable`
//!
//! Ciphertexts are `v{key_version}:` followed by base64(nonce ‖ ciphertext).

use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalDatabase;
use crate::models::EntityKind;
use crypto::{Aes256GcmEncryptor, Kdf, KeyWrapper};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Version tag written in front of every ciphertext
pub const KEY_VERSION: u32 = 1;

const DEVICE_SECRET_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Which kinds are encrypted, and which of their fields move into the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityPolicy {
    pub encrypted_kinds: Vec<EntityKind>,
    /// Payload field names (camelCase) stored only inside `encrypted_data`
    pub sensitive_fields: BTreeMap<EntityKind, Vec<String>>,
}

impl Default for SensitivityPolicy {
    fn default() -> Self {
        let fields = |names: &[&str]| names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>();

        let mut sensitive_fields = BTreeMap::new();
        sensitive_fields.insert(
            EntityKind::Assessment,
            fields(&["assessorName", "notes", "location", "details", "affectedPopulation"]),
        );
        sensitive_fields.insert(
            EntityKind::Incident,
            fields(&["description", "location", "affectedPopulation"]),
        );
        sensitive_fields.insert(
            EntityKind::Entity,
            fields(&["contact", "location", "population"]),
        );

        Self {
            encrypted_kinds: vec![EntityKind::Assessment, EntityKind::Incident, EntityKind::Entity],
            sensitive_fields,
        }
    }
}

impl SensitivityPolicy {
    pub fn requires_encryption(&self, kind: EntityKind) -> bool {
        self.encrypted_kinds.contains(&kind)
    }

    pub fn sensitive_fields(&self, kind: EntityKind) -> &[String] {
        self.sensitive_fields
            .get(&kind)
            .map_or(&[], Vec::as_slice)
    }

    /// Split a payload object into (public, sensitive) halves
    pub fn split(&self, kind: EntityKind, value: Value) -> (Value, Value) {
        let Value::Object(mut public) = value else {
            return (value, Value::Object(Map::new()));
        };

        let mut sensitive = Map::new();
        for field in self.sensitive_fields(kind) {
            if let Some(v) = public.remove(field) {
                sensitive.insert(field.clone(), v);
            }
        }
        (Value::Object(public), Value::Object(sensitive))
    }

    /// Inverse of [`SensitivityPolicy::split`]
    pub fn merge(public: Value, sensitive: Value) -> Value {
        match (public, sensitive) {
            (Value::Object(mut public), Value::Object(sensitive)) => {
                public.extend(sensitive);
                Value::Object(public)
            }
            (public, _) => public,
        }
    }
}

/// AES-256-GCM cipher over JSON values
pub struct RecordCipher {
    encryptor: Aes256GcmEncryptor,
}

impl RecordCipher {
    pub fn new(key: &[u8; 32], key_version: u32) -> SyncResult<Self> {
        let encryptor = Aes256GcmEncryptor::new(*key)?.with_version(key_version);
        Ok(Self { encryptor })
    }

    /// A cipher over a fresh random key
    pub fn generate() -> SyncResult<Self> {
        let key = Zeroizing::new(Aes256GcmEncryptor::generate_key());
        Self::new(&key, KEY_VERSION)
    }

    pub fn encrypt(&self, value: &Value) -> SyncResult<String> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        Ok(self.encryptor.seal(&plaintext)?)
    }

    /// Decrypt a blob; never returns partial data
    pub fn decrypt(&self, blob: &str) -> SyncResult<Value> {
        let plaintext = Zeroizing::new(self.encryptor.open(blob)?);
        serde_json::from_slice(&plaintext)
            .map_err(|e| SyncError::Decryption(format!("decrypted blob is not JSON: {e}")))
    }

    pub fn key_version(&self) -> u32 {
        self.encryptor.version()
    }

    pub fn fingerprint(&self) -> String {
        self.encryptor.fingerprint()
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("key_version", &self.key_version())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// The session-scoped key held by a [`LocalDatabase`]
#[derive(Clone, Default)]
pub struct KeySlot {
    inner: Arc<RwLock<Option<Arc<RecordCipher>>>>,
}

impl KeySlot {
    pub fn install(&self, cipher: RecordCipher) {
        *self.inner.write() = Some(Arc::new(cipher));
    }

    /// Drop the key; it is zeroized once in-flight users release it
    pub fn clear(&self) {
        self.inner.write().take();
    }

    pub fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn current(&self) -> SyncResult<Arc<RecordCipher>> {
        self.inner
            .read()
            .clone()
            .ok_or_else(|| SyncError::KeyUnavailable("no session is open".to_string()))
    }
}

/// A data key as persisted in `key_store`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub wrapped_key: String,
    pub salt: String,
    pub key_version: u32,
}

/// Creates, unwraps and installs per-user data keys
#[derive(Debug, Clone)]
pub struct KeyVault {
    key_file: PathBuf,
    profile: String,
}

impl KeyVault {
    pub fn new(key_file: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            key_file: key_file.into(),
            profile: profile.into(),
        }
    }

    /// Vault using the key file and profile configured for `db`
    pub fn for_database(db: &LocalDatabase) -> Self {
        Self::new(db.config().key_file_path(), db.config().profile.clone())
    }

    /// Unwrap (or create) the user's data key and install it into `db`
    ///
    /// Returns the key fingerprint.
    pub async fn open_session(&self, db: &LocalDatabase, user_id: &str) -> SyncResult<String> {
        if user_id.trim().is_empty() {
            return Err(SyncError::Validation("user id is required to open a session".into()));
        }

        let device_secret = self.load_or_create_device_secret()?;
        let info = format!("reliefwatch:{}:{}", self.profile, user_id);

        let data_key = match db.load_wrapped_key(&self.profile, user_id).await? {
            Some(stored) => unwrap_stored(&device_secret, &info, &stored)?,
            None => {
                let salt = Kdf::generate_salt(SALT_LEN);
                let kek = Kdf::derive_aes256_key(&device_secret, &salt, info.as_bytes())?;
                let wrapper = KeyWrapper::new(*kek)?;
                let data_key = Zeroizing::new(Aes256GcmEncryptor::generate_key());

                let stored = StoredKey {
                    wrapped_key: wrapper.wrap(&data_key)?,
                    salt: hex::encode(&salt),
                    key_version: KEY_VERSION,
                };
                if db.store_wrapped_key(&self.profile, user_id, &stored).await? {
                    info!(profile = %self.profile, "Generated data key for new user");
                    data_key
                } else {
                    // Lost a race with a concurrent first session; use the stored key
                    let stored = db
                        .load_wrapped_key(&self.profile, user_id)
                        .await?
                        .ok_or_else(|| SyncError::KeyUnavailable("data key row vanished".into()))?;
                    unwrap_stored(&device_secret, &info, &stored)?
                }
            }
        };

        let cipher = RecordCipher::new(&data_key, KEY_VERSION)?;
        let fingerprint = cipher.fingerprint();
        db.key_slot().install(cipher);

        info!(profile = %self.profile, key_fingerprint = %fingerprint, "Session key installed");
        Ok(fingerprint)
    }

    pub fn close_session(&self, db: &LocalDatabase) {
        db.key_slot().clear();
        info!(profile = %self.profile, "Session key cleared");
    }

    fn load_or_create_device_secret(&self) -> SyncResult<Zeroizing<Vec<u8>>> {
        if self.key_file.exists() {
            return read_device_secret(&self.key_file);
        }

        let secret = Zeroizing::new(Kdf::generate_salt(DEVICE_SECRET_LEN));
        match create_owner_only(&self.key_file) {
            Ok(mut file) => {
                let encoded = Zeroizing::new(hex::encode(secret.as_slice()));
                file.write_all(encoded.as_bytes()).map_err(|e| {
                    SyncError::KeyUnavailable(format!("failed to write device key file: {e}"))
                })?;
                info!(path = %self.key_file.display(), "Created device key file");
                Ok(secret)
            }
            // Another process created it first
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                read_device_secret(&self.key_file)
            }
            Err(e) => Err(SyncError::KeyUnavailable(format!(
                "failed to create device key file: {e}"
            ))),
        }
    }
}

fn unwrap_stored(
    device_secret: &[u8],
    info: &str,
    stored: &StoredKey,
) -> SyncResult<Zeroizing<[u8; 32]>> {
    let salt = hex::decode(&stored.salt)
        .map_err(|e| SyncError::KeyUnavailable(format!("corrupt key salt: {e}")))?;
    let kek = Kdf::derive_aes256_key(device_secret, &salt, info.as_bytes())?;
    let wrapper = KeyWrapper::new(*kek)?;
    wrapper
        .unwrap_key(&stored.wrapped_key)
        .map_err(|e| SyncError::KeyUnavailable(format!("stored data key cannot be unwrapped: {e}")))
}

fn read_device_secret(path: &Path) -> SyncResult<Zeroizing<Vec<u8>>> {
    tighten_permissions(path);

    let encoded = Zeroizing::new(
        std::fs::read_to_string(path)
            .map_err(|e| SyncError::KeyUnavailable(format!("failed to read device key file: {e}")))?,
    );
    let secret = Zeroizing::new(
        hex::decode(encoded.trim())
            .map_err(|e| SyncError::KeyUnavailable(format!("corrupt device key file: {e}")))?,
    );
    if secret.len() != DEVICE_SECRET_LEN {
        return Err(SyncError::KeyUnavailable(format!(
            "device key file holds {} bytes, expected {DEVICE_SECRET_LEN}",
            secret.len()
        )));
    }
    Ok(secret)
}

#[cfg(unix)]
fn create_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}

#[cfg(unix)]
fn tighten_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.permissions().mode() & 0o077 != 0 {
        warn!(path = %path.display(), "Device key file readable by others, restricting to 0600");
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "Failed to restrict device key file permissions");
        }
    }
}

#[cfg(not(unix))]
fn tighten_permissions(_path: &Path) {}
