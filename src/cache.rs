//! Read-through caching of computed payloads.
//!
//! The cache is a capability handed to the service, never process state.
//! Entries are JSON values under deterministic keys; nothing is ever
//! invalidated explicitly, the store's own eviction decides lifetime.
//!
//! Cache failures are soft: a failed read is a miss, a failed write is
//! logged and the computed value is still returned.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CacheError;

pub const DEFAULT_CACHE_CAPACITY: usize = 512;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;
}

/// Deterministic key built from an operation name and every parameter that
/// affects its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str) -> Self {
        Self(operation.to_string())
    }

    pub fn part(mut self, part: impl std::fmt::Display) -> Self {
        self.0.push('-');
        self.0.push_str(&part.to_string());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    value: Value,
    stored_at: Instant,
}

/// Bounded in-process store: least recently used entries go first, and
/// entries older than the TTL (when set) read as absent.
pub struct LruStore {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Option<Duration>,
}

impl LruStore {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for LruStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, None)
    }
}

#[async_trait]
impl CacheStore for LruStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl),
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.lock().await.put(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}

/// Stores nothing; every read misses.
pub struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Serve `key` from the cache, or compute, store and return it.
pub async fn read_through<T, E, F, Fut>(
    cache: &dyn CacheStore,
    key: &CacheKey,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match cache.get(key.as_str()).await {
        Ok(Some(value)) => match serde_json::from_value::<T>(value) {
            Ok(cached) => {
                tracing::debug!(key = %key, "cache hit");
                return Ok(cached);
            }
            Err(err) => tracing::warn!(key = %key, error = %err, "cached value did not decode, recomputing"),
        },
        Ok(None) => tracing::debug!(key = %key, "cache miss"),
        Err(err) => tracing::warn!(key = %key, error = %err, "cache read failed, computing directly"),
    }

    let computed = compute().await?;

    match serde_json::to_value(&computed) {
        Ok(value) => {
            if let Err(err) = cache.set(key.as_str(), value).await {
                tracing::warn!(key = %key, error = %err, "cache write failed");
            }
        }
        Err(err) => tracing::warn!(key = %key, error = %err, "computed value did not serialize"),
    }

    Ok(computed)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A cache whose store is unreachable.
    pub struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::BrokenCache;
    use super::*;
    use serde_json::json;

    fn key() -> CacheKey {
        CacheKey::new("entityDetails").part("task").part("t1")
    }

    #[test]
    fn key_joins_every_part() {
        assert_eq!(key().as_str(), "entityDetails-task-t1");
        assert_ne!(key(), CacheKey::new("entityDetails").part("task").part("t2"));
    }

    #[tokio::test]
    async fn second_read_skips_computation() {
        let cache = LruStore::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Result<i64, CacheError> = read_through(&cache, &key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;
            assert_eq!(value.unwrap(), 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached() {
        let cache = LruStore::default();
        let failed: Result<i64, String> = read_through(&cache, &key(), || async { Err("boom".to_string()) }).await;
        assert!(failed.is_err());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn unavailable_cache_falls_through() {
        let value: Result<String, CacheError> =
            read_through(&BrokenCache, &key(), || async { Ok("fresh".to_string()) }).await;
        assert_eq!(value.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn undecodable_entry_is_recomputed() {
        let cache = LruStore::default();
        cache.set(key().as_str(), json!("not a number")).await.unwrap();
        let value: Result<i64, CacheError> = read_through(&cache, &key(), || async { Ok(7) }).await;
        assert_eq!(value.unwrap(), 7);
        assert_eq!(cache.get(key().as_str()).await.unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = LruStore::new(2, None);
        cache.set("a", json!(1)).await.unwrap();
        cache.set("b", json!(2)).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", json!(3)).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache = LruStore::new(4, Some(Duration::from_millis(10)));
        cache.set("a", json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn noop_cache_never_hits() {
        NoopCache.set("a", json!(1)).await.unwrap();
        assert_eq!(NoopCache.get("a").await.unwrap(), None);
    }
}
