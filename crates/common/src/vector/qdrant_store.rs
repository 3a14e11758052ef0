//! Qdrant vector store backend
//!
//! Material ids are opaque strings, while Qdrant point ids must be UUIDs;
//! the adapter derives a stable UUID per id and keeps the real id in the
//! payload under `id`.

use super::{FieldCondition, PayloadFilter, ScoredRecord, VectorRecord, VectorStore};
use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, vectors_output::VectorsOptions, vectors_config, Condition, CountPointsBuilder,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder, ListValue,
    PointId, PointStruct, PointsIdsList, Range, ScrollPointsBuilder, SearchPointsBuilder, Struct,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Qdrant `VectorStore`
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    /// Connect to Qdrant
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url)
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build().map_err(|e| AppError::VectorStore {
            message: format!("Failed to create Qdrant client: {}", e),
        })?;
        Ok(Self { client })
    }

    /// Stable UUID point id derived from the opaque string id
    fn point_id(id: &str) -> PointId {
        let digest = Sha1::digest(id.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        PointId::from(Uuid::from_bytes(bytes).to_string())
    }

    fn to_filter(filter: &PayloadFilter) -> Filter {
        let conditions: Vec<Condition> = filter
            .must
            .iter()
            .map(|cond| match cond {
                FieldCondition::Eq(field, value) => {
                    Condition::matches(field.clone(), value.clone())
                }
                FieldCondition::In(field, values) => {
                    Condition::matches(field.clone(), values.clone())
                }
                FieldCondition::Range { field, gte, lt } => Condition::range(
                    field.clone(),
                    Range {
                        gte: *gte,
                        lt: *lt,
                        ..Default::default()
                    },
                ),
            })
            .collect();
        Filter::must(conditions)
    }

    fn json_to_value(value: serde_json::Value) -> Value {
        let kind = match value {
            serde_json::Value::Null => Kind::NullValue(0),
            serde_json::Value::Bool(b) => Kind::BoolValue(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Kind::IntegerValue(i)
                } else {
                    Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Kind::StringValue(s),
            serde_json::Value::Array(items) => Kind::ListValue(ListValue {
                values: items.into_iter().map(Self::json_to_value).collect(),
            }),
            serde_json::Value::Object(map) => Kind::StructValue(Struct {
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, Self::json_to_value(v)))
                    .collect(),
            }),
        };
        Value { kind: Some(kind) }
    }

    fn value_to_json(value: Value) -> serde_json::Value {
        match value.kind {
            Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
            Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
            Some(Kind::DoubleValue(d)) => serde_json::Value::from(d),
            Some(Kind::StringValue(s)) => serde_json::Value::String(s),
            Some(Kind::ListValue(list)) => serde_json::Value::Array(
                list.values.into_iter().map(Self::value_to_json).collect(),
            ),
            Some(Kind::StructValue(fields)) => serde_json::Value::Object(
                fields
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::value_to_json(v)))
                    .collect(),
            ),
            _ => serde_json::Value::Null,
        }
    }

    fn payload_to_json(payload: HashMap<String, Value>) -> serde_json::Value {
        serde_json::Value::Object(
            payload
                .into_iter()
                .map(|(k, v)| (k, Self::value_to_json(v)))
                .collect(),
        )
    }

    fn json_to_payload(payload: serde_json::Value) -> HashMap<String, Value> {
        match payload {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, Self::json_to_value(v)))
                .collect(),
            _ => HashMap::new(),
        }
    }

    fn record_id(payload: &serde_json::Value) -> String {
        payload
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        if self.client.collection_exists(name).await? {
            // Dimension mismatch against an existing collection is a
            // deployment error, refuse to start on it
            let info = self.client.collection_info(name).await?;
            let existing = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config)
                .and_then(|c| match c {
                    vectors_config::Config::Params(params) => Some(params.size),
                    vectors_config::Config::ParamsMap(_) => None,
                });
            if let Some(size) = existing {
                if size != dimension as u64 {
                    return Err(AppError::Configuration {
                        message: format!(
                            "Collection '{}' has dimension {}, expected {}",
                            name, size, dimension
                        ),
                    });
                }
            }
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    dimension as u64,
                    Distance::Cosine,
                )),
            )
            .await?;
        info!(collection = name, dimension, "Created vector collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                PointStruct::new(
                    Self::point_id(&record.id),
                    record.vector.unwrap_or_default(),
                    Self::json_to_payload(record.payload),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, ids: &[String]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(id)).collect();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(collection, point_ids)
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = Self::payload_to_json(point.payload);
                let vector = point.vectors.and_then(|v| match v.vectors_options {
                    Some(VectorsOptions::Vector(vector)) => Some(vector.data),
                    _ => None,
                });
                VectorRecord {
                    id: Self::record_id(&payload),
                    vector,
                    payload,
                }
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(id)).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let mut builder =
            SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64).with_payload(true);
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            builder = builder.filter(Self::to_filter(f));
        }

        let response = self.client.search_points(builder).await?;
        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = Self::payload_to_json(point.payload);
                ScoredRecord {
                    id: Self::record_id(&payload),
                    score: point.score.clamp(0.0, 1.0),
                    payload,
                }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .limit(limit as u32)
            .with_payload(true);
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            builder = builder.filter(Self::to_filter(f));
        }

        let response = self.client.scroll(builder).await?;
        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = Self::payload_to_json(point.payload);
                VectorRecord {
                    id: Self::record_id(&payload),
                    vector: None,
                    payload,
                }
            })
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client.delete_collection(name).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client.health_check().await?;
        Ok(())
    }
}
