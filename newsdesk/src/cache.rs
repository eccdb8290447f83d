//! TTL caches for the analyzed feed and the daily briefing.
//!
//! Records are JSON inside a versioned envelope and live in a key/value
//! [`CacheStore`]. A record is served only while `now - timestamp < ttl`;
//! stale records are left in place and get overwritten by the next save.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::model::{Article, Briefing};

/// Bumped whenever a cached payload changes shape. Older records read as a miss.
pub const SCHEMA_VERSION: u32 = 1;

/// Key/value substrate behind the caches
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by the `cache_entries` table
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM cache_entries WHERE cache_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read cache entry")
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (cache_key, value, updated_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to write cache entry")?;
        Ok(())
    }
}

/// Payloads that carry the instant their TTL is measured from
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    schema_version: u32,
    payload: T,
}

/// Persisted feed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub analyzed_articles: Vec<Article>,
    pub all_fetched_articles: Vec<Article>,
    pub fetched_at: DateTime<Utc>,
}

impl Timestamped for CacheRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefingRecord {
    pub briefing: Briefing,
    pub generated_at: DateTime<Utc>,
}

impl Timestamped for BriefingRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

pub fn feed_key(user_id: &str, fingerprint: &str) -> String {
    format!("feed:{}:{}", user_id, fingerprint)
}

pub fn briefing_key(user_id: &str, fingerprint: &str) -> String {
    format!("briefing:{}:{}", user_id, fingerprint)
}

/// One cache slot with its own TTL
pub struct TtlCache<T> {
    store: Arc<dyn CacheStore>,
    key: String,
    ttl: chrono::Duration,
    _payload: PhantomData<fn() -> T>,
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned + Timestamped,
{
    pub fn new(store: Arc<dyn CacheStore>, key: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            _payload: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub async fn load(&self) -> Option<T> {
        self.load_at(Utc::now()).await
    }

    /// The stored record if it is younger than the TTL at `now`. Missing,
    /// stale, unreadable or other-version records are all a miss.
    pub async fn load_at(&self, now: DateTime<Utc>) -> Option<T> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                let err = PipelineError::CacheRead(format!("{:#}", e));
                tracing::warn!(key = %self.key, "{}", err);
                return None;
            }
        };

        let record = match decode::<T>(&raw) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!(key = %self.key, "Cached record has another schema version, ignoring");
                return None;
            }
            Err(e) => {
                let err = PipelineError::CacheRead(format!("{:#}", e));
                tracing::warn!(key = %self.key, "{}", err);
                return None;
            }
        };

        let age = now.signed_duration_since(record.timestamp());
        if age < self.ttl {
            tracing::debug!(key = %self.key, age_secs = age.num_seconds(), "Cache hit");
            Some(record)
        } else {
            tracing::debug!(key = %self.key, age_secs = age.num_seconds(), "Cache entry stale");
            None
        }
    }

    /// Overwrite whatever is stored under this key.
    pub async fn save(&self, record: &T) -> Result<(), PipelineError> {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            payload: record,
        };
        let json = serde_json::to_string(&envelope).map_err(|e| PipelineError::Store(e.to_string()))?;
        self.store
            .set(&self.key, &json)
            .await
            .map_err(|e| PipelineError::Store(format!("{:#}", e)))
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<Option<T>> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_str(raw).context("cached record is not a valid envelope")?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Ok(None);
    }
    let payload = serde_json::from_value(envelope.payload).context("cached payload has unexpected shape")?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    fn record(fetched_at: DateTime<Utc>) -> CacheRecord {
        CacheRecord {
            analyzed_articles: vec![],
            all_fetched_articles: vec![],
            fetched_at,
        }
    }

    fn feed_cache(store: Arc<dyn CacheStore>) -> TtlCache<CacheRecord> {
        TtlCache::new(store, feed_key("u1", "abc"), chrono::Duration::minutes(30))
    }

    #[tokio::test]
    async fn ttl_boundary_is_exclusive() {
        let cache = feed_cache(Arc::new(MemoryStore::new()));
        let fetched_at = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        cache.save(&record(fetched_at)).await.unwrap();

        let ttl = chrono::Duration::minutes(30);
        let ms = chrono::Duration::milliseconds(1);
        assert!(cache.load_at(fetched_at + ttl - ms).await.is_some());
        assert!(cache.load_at(fetched_at + ttl).await.is_none());
        assert!(cache.load_at(fetched_at + ttl + ms).await.is_none());
    }

    #[tokio::test]
    async fn stale_record_is_kept_in_store() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let cache = feed_cache(store.clone());
        let fetched_at = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        cache.save(&record(fetched_at)).await.unwrap();

        assert!(cache.load_at(fetched_at + chrono::Duration::hours(2)).await.is_none());
        assert!(store.get(cache.key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_and_foreign_version_records_are_misses() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let cache = feed_cache(store.clone());
        let now = Utc::now();

        store.set(cache.key(), "{not json").await.unwrap();
        assert!(cache.load_at(now).await.is_none());

        let future = serde_json::json!({
            "schemaVersion": SCHEMA_VERSION + 1,
            "payload": record(now),
        });
        store.set(cache.key(), &future.to_string()).await.unwrap();
        assert!(cache.load_at(now).await.is_none());

        // old unversioned shape
        store.set(cache.key(), &serde_json::to_string(&record(now)).unwrap()).await.unwrap();
        assert!(cache.load_at(now).await.is_none());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_and_overwrites() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        common::run_migrations(&pool).await.expect("migrations");

        let store = SqliteStore::new(pool);
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "one").await.unwrap();
        store.set("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));

        let cache = feed_cache(Arc::new(store));
        let now = Utc::now();
        cache.save(&record(now)).await.unwrap();
        assert_eq!(cache.load_at(now).await, Some(record(now)));
    }

    #[test]
    fn keys_are_separate_per_kind() {
        assert_ne!(feed_key("u", "f"), briefing_key("u", "f"));
        assert_eq!(feed_key("u", "f"), "feed:u:f");
    }
}
