//! TTL caches for query results and map data
//!
//! Expired rows are swept on every read, so a stale value is never served.

use super::{format_ts, LocalDatabase};
use crate::error::SyncResult;
use serde_json::Value;
use std::time::Duration;

/// Longer TTLs are clamped so `expires_at` keeps a four-digit year
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTable {
    Query,
    Map,
}

impl CacheTable {
    pub const ALL: [CacheTable; 2] = [CacheTable::Query, CacheTable::Map];

    pub fn table(self) -> &'static str {
        match self {
            Self::Query => "query_cache",
            Self::Map => "map_cache",
        }
    }
}

impl LocalDatabase {
    pub async fn cache_put(&self, table: CacheTable, key: &str, value: &Value, ttl: Duration) -> SyncResult<()> {
        let stamp = self.stamp();
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL)).unwrap_or_else(|_| chrono::Duration::days(1));
        let expires_at = stamp.at + ttl;
        let name = table.table();

        sqlx::query(&format!(
            r#"
            INSERT INTO {name} (cache_key, value, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#
        ))
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(format_ts(&expires_at))
        .bind(&stamp.text)
        .execute(&self.pool)
        .await?;

        tracing::debug!(cache = name, key = key, "Cached value");
        Ok(())
    }

    /// Sweep expired rows, then look `key` up
    pub async fn cache_get(&self, table: CacheTable, key: &str) -> SyncResult<Option<Value>> {
        let name = table.table();
        let now = format_ts(&self.clock.now());

        let swept = sqlx::query(&format!("DELETE FROM {name} WHERE expires_at <= ?"))
            .bind(&now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if swept > 0 {
            tracing::debug!(cache = name, swept, "Swept expired cache rows");
        }

        let value: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM {name} WHERE cache_key = ?"))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Drop one key, or the whole table when `key` is `None`
    pub async fn cache_invalidate(&self, table: CacheTable, key: Option<&str>) -> SyncResult<u64> {
        let name = table.table();
        let result = match key {
            Some(key) => {
                sqlx::query(&format!("DELETE FROM {name} WHERE cache_key = ?"))
                    .bind(key)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("DELETE FROM {name}"))
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}
