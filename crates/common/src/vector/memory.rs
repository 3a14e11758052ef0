//! In-memory vector store
//!
//! Brute-force nearest neighbor over process-local collections. Backs the
//! test suite and single-node development where no Qdrant is available.

use super::{
    cosine_similarity, FieldCondition, PayloadFilter, ScoredRecord, VectorRecord, VectorStore,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Collection {
    dimension: usize,
    points: HashMap<String, VectorRecord>,
}

/// In-memory `VectorStore`
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn matches(filter: &PayloadFilter, payload: &serde_json::Value) -> bool {
        filter.must.iter().all(|cond| match cond {
            FieldCondition::Eq(field, value) => {
                payload.get(field).and_then(|v| v.as_str()) == Some(value.as_str())
            }
            FieldCondition::In(field, values) => payload
                .get(field)
                .and_then(|v| v.as_str())
                .map(|v| values.iter().any(|allowed| allowed == v))
                .unwrap_or(false),
            FieldCondition::Range { field, gte, lt } => {
                let Some(value) = payload.get(field).and_then(|v| v.as_f64()) else {
                    return false;
                };
                if let Some(min) = gte {
                    if value < *min {
                        return false;
                    }
                }
                if let Some(max) = lt {
                    if value >= *max {
                        return false;
                    }
                }
                true
            }
        })
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => Err(AppError::Configuration {
                message: format!(
                    "Collection '{}' has dimension {}, expected {}",
                    name, existing.dimension, dimension
                ),
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        points: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| AppError::VectorStore {
                message: format!("Unknown collection: {}", collection),
            })?;

        for record in records {
            if let Some(vector) = &record.vector {
                if vector.len() != coll.dimension {
                    return Err(AppError::EmbeddingShape {
                        expected: coll.dimension,
                        actual: vector.len(),
                    });
                }
            }
            coll.points.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn get(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| AppError::VectorStore {
                message: format!("Unknown collection: {}", collection),
            })?;

        Ok(ids
            .iter()
            .filter_map(|id| coll.points.get(id).cloned())
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(coll) = collections.get_mut(collection) {
            for id in ids {
                coll.points.remove(id);
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| AppError::VectorStore {
                message: format!("Unknown collection: {}", collection),
            })?;

        let mut scored: Vec<ScoredRecord> = coll
            .points
            .values()
            .filter(|record| record.vector.is_some())
            .filter(|record| {
                filter
                    .map(|f| Self::matches(f, &record.payload))
                    .unwrap_or(true)
            })
            .map(|record| {
                let similarity = cosine_similarity(
                    vector,
                    record.vector.as_deref().unwrap_or_default(),
                );
                ScoredRecord {
                    id: record.id.clone(),
                    score: similarity.clamp(0.0, 1.0),
                    payload: record.payload.clone(),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|coll| coll.points.len())
            .unwrap_or(0))
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| AppError::VectorStore {
                message: format!("Unknown collection: {}", collection),
            })?;

        let mut records: Vec<VectorRecord> = coll
            .points
            .values()
            .filter(|record| {
                filter
                    .map(|f| Self::matches(f, &record.payload))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>, unit: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector: Some(vector),
            payload: json!({"id": id, "unit": unit, "created_at_ts": 100.0}),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("materials", 3).await.unwrap();
        store
            .upsert(
                "materials",
                vec![
                    record("a", vec![1.0, 0.0, 0.0], "шт"),
                    record("b", vec![0.0, 1.0, 0.0], "кг"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("materials", &[1.0, 0.0, 0.0], None, 10)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_filter_pushdown() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("materials", 3).await.unwrap();
        store
            .upsert(
                "materials",
                vec![
                    record("a", vec![1.0, 0.0, 0.0], "шт"),
                    record("b", vec![1.0, 0.0, 0.0], "кг"),
                ],
            )
            .await
            .unwrap();

        let filter = PayloadFilter::default().eq("unit", "кг");
        let hits = store
            .search("materials", &[1.0, 0.0, 0.0], Some(&filter), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("materials", 3).await.unwrap();
        let err = store
            .upsert("materials", vec![record("a", vec![1.0, 0.0], "шт")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmbeddingShape { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn test_range_filter_half_open() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("m", 2).await.unwrap();
        store
            .upsert(
                "m",
                vec![VectorRecord {
                    id: "x".into(),
                    vector: Some(vec![1.0, 0.0]),
                    payload: json!({"created_at_ts": 100.0}),
                }],
            )
            .await
            .unwrap();

        let inside = PayloadFilter::default().range("created_at_ts", Some(100.0), Some(200.0));
        let outside = PayloadFilter::default().range("created_at_ts", Some(0.0), Some(100.0));
        assert_eq!(
            store.search("m", &[1.0, 0.0], Some(&inside), 10).await.unwrap().len(),
            1
        );
        // lt bound is exclusive
        assert_eq!(
            store.search("m", &[1.0, 0.0], Some(&outside), 10).await.unwrap().len(),
            0
        );
    }
}
