//! Cache adapter
//!
//! Provides:
//! - Key/value operations with TTL
//! - Batch get/set
//! - Bounded pattern delete (SCAN budget)
//! - Atomic sliding-window counters for rate limiting
//! - Typed helpers with single-flight miss collapsing

mod memory;
mod pooled;
mod redis_store;
mod single_flight;

pub use memory::MemoryCache;
pub use pooled::PooledCacheStore;
pub use redis_store::RedisCache;
pub use single_flight::SingleFlight;

use crate::errors::Result;
use crate::metrics;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of an atomic trim-and-append on a sliding window
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    /// Entries inside the window after the append
    pub count: u64,
    /// Score (epoch millis) of the oldest entry still in the window
    pub oldest_ms: Option<u64>,
}

/// Capability set every cache backend provides
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw serialized value
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Set a raw serialized value with TTL
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Batch get; result preserves the input order
    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Delete a single key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete keys matching a glob pattern, scanning at most `budget` keys.
    /// Residual entries age out via their TTL.
    async fn delete_pattern(&self, pattern: &str, budget: usize) -> Result<usize>;

    /// Atomically drop window entries older than `window`, append one entry
    /// at `now_ms`, and return the resulting window state
    async fn window_trim_and_append(
        &self,
        key: &str,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowSample>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Typed cache facade shared by the services.
///
/// Wraps a backend with JSON serialization and a single-flight map so that
/// concurrent misses for the same key collapse into one loader call.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    flight: Arc<SingleFlight>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            flight: Arc::new(SingleFlight::new()),
        }
    }

    /// Access the raw backend
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_raw(key).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json)?;
                debug!(key = %key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.set_raw(key, &json, ttl).await
    }

    /// Batch get preserving input order
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.store.get_many_raw(keys).await?;
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            match value {
                Some(json) => out.push(serde_json::from_str(&json).ok()),
                None => out.push(None),
            }
        }
        Ok(out)
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    /// Bounded pattern delete
    pub async fn delete_pattern(&self, pattern: &str, budget: usize) -> Result<usize> {
        let deleted = self.store.delete_pattern(pattern, budget).await?;
        debug!(pattern = %pattern, deleted, "Cache pattern delete");
        Ok(deleted)
    }

    /// Get or load with single-flight collapsing.
    ///
    /// Concurrent misses for the same key wait on the in-flight loader
    /// instead of issuing their own backend calls. The wait is bounded by
    /// `backend_timeout` plus one second.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        cache_name: &str,
        key: &str,
        ttl: Duration,
        backend_timeout: Duration,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            metrics::record_cache(true, cache_name);
            return Ok(cached);
        }
        metrics::record_cache(false, cache_name);

        let store = Arc::clone(&self.store);
        let key_owned = key.to_string();
        let json = self
            .flight
            .run(key, backend_timeout + Duration::from_secs(1), || async move {
                let value = loader().await?;
                let json = serde_json::to_string(&value)?;
                if let Err(e) = store.set_raw(&key_owned, &json, ttl).await {
                    warn!(error = %e, key = %key_owned, "Failed to cache value, continuing without cache");
                }
                Ok(json)
            })
            .await?;

        Ok(serde_json::from_str(&json)?)
    }

    /// Connectivity check
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

/// Cache key builder helpers
pub mod keys {
    /// Material record
    pub fn material(id: &str) -> String {
        format!("mat:{}", id)
    }

    /// Batch of material ids (hash over the sorted id list)
    pub fn material_batch(sorted_ids_hash: &str) -> String {
        format!("mat:batch:{}", sorted_ids_hash)
    }

    /// Search response for a canonical query hash
    pub fn search(query_hash: &str) -> String {
        format!("search:{}", query_hash)
    }

    /// Suggestions for a prefix
    pub fn suggest(prefix: &str) -> String {
        format!("suggest:{}", prefix.to_lowercase())
    }

    /// SKU lookup result for a combined-embedding hash
    pub fn sku(combined_hash: &str) -> String {
        format!("sku:{}", combined_hash)
    }

    /// Combined embedding for a text hash
    pub fn combined(text_hash: &str) -> String {
        format!("combined:{}", text_hash)
    }

    /// Sliding rate-limit window
    pub fn rate_limit(client_id: &str, endpoint_class: &str, window: &str) -> String {
        format!("ratelimit:{}:{}:{}", client_id, endpoint_class, window)
    }

    /// Ephemeral job state (cache fallback when SQL is down)
    pub fn job(request_id: &str) -> String {
        format!("job:{}", request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::material("m-1"), "mat:m-1");
        assert_eq!(keys::search("abc123"), "search:abc123");
        assert_eq!(keys::suggest("КирП"), "suggest:кирп");
        assert_eq!(keys::rate_limit("1.2.3.4", "search", "60"), "ratelimit:1.2.3.4:search:60");
    }

    #[tokio::test]
    async fn test_get_or_load_populates_cache() {
        let cache = Cache::new(Arc::new(MemoryCache::new()));
        let value: String = cache
            .get_or_load(
                "test",
                "k1",
                Duration::from_secs(60),
                Duration::from_secs(1),
                || async { Ok("loaded".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(value, "loaded");

        let cached: Option<String> = cache.get("k1").await.unwrap();
        assert_eq!(cached.as_deref(), Some("loaded"));
    }
}
