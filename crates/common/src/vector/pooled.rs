//! Pool-governed vector store decorator
//!
//! Every call checks a permit out of the adapter's `AdaptivePool`, so the
//! pool manager's resizing directly bounds concurrent vector-store work.

use super::{PayloadFilter, ScoredRecord, VectorRecord, VectorStore};
use crate::errors::Result;
use crate::pool::AdaptivePool;
use async_trait::async_trait;
use std::sync::Arc;

pub struct PooledVectorStore {
    inner: Arc<dyn VectorStore>,
    pool: Arc<AdaptivePool>,
}

impl PooledVectorStore {
    pub fn new(inner: Arc<dyn VectorStore>, pool: Arc<AdaptivePool>) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl VectorStore for PooledVectorStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.ensure_collection(name, dimension).await
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.upsert(collection, records).await
    }

    async fn get(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>> {
        let _permit = self.pool.checkout().await;
        self.inner.get(collection, ids).await
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.delete(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let _permit = self.pool.checkout().await;
        self.inner.search(collection, vector, filter, limit).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let _permit = self.pool.checkout().await;
        self.inner.count(collection).await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let _permit = self.pool.checkout().await;
        self.inner.scroll(collection, filter, limit).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.delete_collection(name).await
    }

    async fn ping(&self) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::MemoryVectorStore;

    #[tokio::test]
    async fn test_calls_pass_through_with_permits() {
        let pool = Arc::new(AdaptivePool::new("vector", 2));
        let store = PooledVectorStore::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::clone(&pool),
        );

        store.ensure_collection("c", 2).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
        // Permits returned after each call
        assert_eq!(pool.stats().in_use, 0);
    }
}
