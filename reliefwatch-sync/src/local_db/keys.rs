//! Wrapped data keys, one row per (profile, user)

use super::LocalDatabase;
use crate::error::SyncResult;
use crate::record_encryption::StoredKey;
use sqlx::Row;

impl LocalDatabase {
    pub async fn load_wrapped_key(&self, profile: &str, user_id: &str) -> SyncResult<Option<StoredKey>> {
        let row = sqlx::query(
            r#"
            SELECT wrapped_key, salt, key_version
            FROM key_store
            WHERE profile = ? AND user_id = ?
            "#,
        )
        .bind(profile)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let key_version: i64 = row.try_get("key_version")?;
            Ok(StoredKey {
                wrapped_key: row.try_get("wrapped_key")?,
                salt: row.try_get("salt")?,
                key_version: super::to_u32(key_version, "key_version")?,
            })
        })
        .transpose()
    }

    /// Persist a freshly wrapped key
    ///
    /// Returns false when a row for the user already existed; it is kept.
    pub async fn store_wrapped_key(
        &self,
        profile: &str,
        user_id: &str,
        key: &StoredKey,
    ) -> SyncResult<bool> {
        let stamp = self.stamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO key_store (profile, user_id, wrapped_key, salt, key_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(profile)
        .bind(user_id)
        .bind(&key.wrapped_key)
        .bind(&key.salt)
        .bind(i64::from(key.key_version))
        .bind(&stamp.text)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        tracing::debug!(profile = profile, inserted, "Stored wrapped data key");
        Ok(inserted)
    }
}
