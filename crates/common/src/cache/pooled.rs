//! Pool-governed cache backend decorator

use super::{CacheStore, WindowSample};
use crate::errors::Result;
use crate::pool::AdaptivePool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct PooledCacheStore {
    inner: Arc<dyn CacheStore>,
    pool: Arc<AdaptivePool>,
}

impl PooledCacheStore {
    pub fn new(inner: Arc<dyn CacheStore>, pool: Arc<AdaptivePool>) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl CacheStore for PooledCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let _permit = self.pool.checkout().await;
        self.inner.get_raw(key).await
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.set_raw(key, value, ttl).await
    }

    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let _permit = self.pool.checkout().await;
        self.inner.get_many_raw(keys).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _permit = self.pool.checkout().await;
        self.inner.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str, budget: usize) -> Result<usize> {
        let _permit = self.pool.checkout().await;
        self.inner.delete_pattern(pattern, budget).await
    }

    async fn window_trim_and_append(
        &self,
        key: &str,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowSample> {
        let _permit = self.pool.checkout().await;
        self.inner.window_trim_and_append(key, window, now_ms).await
    }

    async fn ping(&self) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.ping().await
    }
}
