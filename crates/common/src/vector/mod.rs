//! Vector store adapter
//!
//! CRUD and nearest-neighbor search over collections of
//! `{id, payload, vector}` with payload filter pushdown and batch upsert.
//! Two backends: Qdrant (production) and in-memory (tests, single-node dev).

mod memory;
mod pooled;
mod qdrant_store;

pub use memory::MemoryVectorStore;
pub use pooled::PooledVectorStore;
pub use qdrant_store::QdrantVectorStore;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One stored point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub payload: serde_json::Value,
}

/// A point returned from nearest-neighbor search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    /// Cosine similarity clamped to [0, 1]
    pub score: f32,
    pub payload: serde_json::Value,
}

/// A single payload predicate
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    /// Field equals the given keyword
    Eq(String, String),
    /// Field is one of the given keywords
    In(String, Vec<String>),
    /// Numeric half-open range `[gte, lt)`
    Range {
        field: String,
        gte: Option<f64>,
        lt: Option<f64>,
    },
}

/// Conjunction of payload predicates pushed down to the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<FieldCondition>,
}

impl PayloadFilter {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push(FieldCondition::Eq(field.into(), value.into()));
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.must.push(FieldCondition::In(field.into(), values));
        }
        self
    }

    pub fn range(mut self, field: impl Into<String>, gte: Option<f64>, lt: Option<f64>) -> Self {
        if gte.is_some() || lt.is_some() {
            self.must.push(FieldCondition::Range {
                field: field.into(),
                gte,
                lt,
            });
        }
        self
    }
}

/// Capability set of a vector backend
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing; verify dimension if present
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Insert or replace points in batch
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Fetch points by id; missing ids are simply absent from the result
    async fn get(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>>;

    /// Delete points by id
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Nearest-neighbor search with optional payload filter
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// Number of points in the collection
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Page through points matching a filter without a query vector
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorRecord>>;

    /// Drop a whole collection
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Cosine similarity of two equal-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_has_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_filter_builder_skips_empty() {
        let filter = PayloadFilter::default()
            .any_of("unit", vec![])
            .range("created_at_ts", None, None);
        assert!(filter.is_empty());

        let filter = PayloadFilter::default()
            .eq("unit", "шт")
            .range("created_at_ts", Some(0.0), None);
        assert_eq!(filter.must.len(), 2);
    }
}
