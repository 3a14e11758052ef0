//! Materials repository
//!
//! The single read/write path for `Material`: cache-aside reads against
//! the authoritative vector store, best-effort SQL mirroring with bounded
//! retries, and search-result caching over the hybrid engine.
//!
//! Dual-store protocol: the vector write happens first and decides the
//! outcome; the SQL write retries three times with jittered exponential
//! backoff and, on final failure, emits a durable reconciliation event
//! instead of failing the caller.

use crate::engine::{SearchEngine, SearchResponse};
use crate::payload::{material_from_payload, material_to_payload};
use crate::query::AdvancedQuery;
use matforge_common::cache::{keys, Cache};
use matforge_common::config::CacheTtlConfig;
use matforge_common::db::SqlBackend;
use matforge_common::embeddings::Embedder;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::Material;
use matforge_common::vector::{VectorRecord, VectorStore};
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// SQL mirror retry backoff base delays
const SQL_RETRY_DELAYS_MS: [u64; 3] = [100, 400, 1600];

/// Scan budget for pattern invalidation
const INVALIDATION_BUDGET: usize = 10_000;

/// Fields whose change forces embedding regeneration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub use_category: Option<String>,
    pub unit: Option<String>,
    pub sku: Option<String>,
}

/// Outcome of one item in a batch create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of a failed SQL mirror write, for the out-of-band
/// reconciler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub op: String,
    pub id: String,
    pub payload: serde_json::Value,
}

pub struct MaterialsRepository {
    vector: Arc<dyn VectorStore>,
    sql: Option<Arc<dyn SqlBackend>>,
    cache: Cache,
    embedder: Arc<dyn Embedder>,
    engine: Arc<SearchEngine>,
    collection: String,
    ttl: CacheTtlConfig,
    batch_chunk_size: usize,
}

impl MaterialsRepository {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        sql: Option<Arc<dyn SqlBackend>>,
        cache: Cache,
        embedder: Arc<dyn Embedder>,
        engine: Arc<SearchEngine>,
        collection: String,
        ttl: CacheTtlConfig,
        batch_chunk_size: usize,
    ) -> Self {
        Self {
            vector,
            sql,
            cache,
            embedder,
            engine,
            collection,
            ttl,
            batch_chunk_size: batch_chunk_size.max(1),
        }
    }

    pub fn sql_available(&self) -> bool {
        self.sql.is_some()
    }

    /// Cache-aside read; the vector store is authoritative for existence,
    /// with SQL covering records that carry no embedding
    pub async fn get(&self, id: &str) -> Result<Option<Material>> {
        let key = keys::material(id);
        if let Some(cached) = self.cache.get::<Material>(&key).await? {
            return Ok(Some(cached));
        }

        let material = self.load_uncached(id).await?;
        if let Some(material) = &material {
            self.cache_material(material).await;
        }
        Ok(material)
    }

    async fn load_uncached(&self, id: &str) -> Result<Option<Material>> {
        let records = self
            .vector
            .get(&self.collection, &[id.to_string()])
            .await?;
        if let Some(record) = records.into_iter().next() {
            let mut material = material_from_payload(&record.payload)
                .ok_or_else(|| AppError::Internal {
                    message: format!("Corrupt payload for material {}", id),
                })?;
            material.embedding = record.vector;
            return Ok(Some(material));
        }

        // Absent from the vector index: the record may exist only in SQL
        match &self.sql {
            Some(sql) => sql.get_material(id).await,
            None => Ok(None),
        }
    }

    /// Batch read preserving input order; one vector round trip for all
    /// cache misses
    pub async fn get_batch(&self, ids: &[String]) -> Result<Vec<Option<Material>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let cache_keys: Vec<String> = ids.iter().map(|id| keys::material(id)).collect();
        let mut results: Vec<Option<Material>> = self.cache.get_many(&cache_keys).await?;
        results.resize(ids.len(), None);

        let missing: Vec<String> = ids
            .iter()
            .zip(results.iter())
            .filter(|(_, cached)| cached.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let fetched = self.vector.get(&self.collection, &missing).await?;
        for record in fetched {
            let Some(mut material) = material_from_payload(&record.payload) else {
                continue;
            };
            material.embedding = record.vector;
            self.cache_material(&material).await;
            if let Some(slot) = ids.iter().position(|id| *id == material.id) {
                results[slot] = Some(material);
            }
        }

        // Leftover misses may live only in SQL
        if let Some(sql) = &self.sql {
            let still_missing: Vec<String> = ids
                .iter()
                .zip(results.iter())
                .filter(|(_, found)| found.is_none())
                .map(|(id, _)| id.clone())
                .collect();
            if !still_missing.is_empty() {
                for material in sql.get_materials(&still_missing).await? {
                    self.cache_material(&material).await;
                    if let Some(slot) = ids.iter().position(|id| *id == material.id) {
                        results[slot] = Some(material);
                    }
                }
            }
        }

        Ok(results)
    }

    /// Create a material, computing its embedding when absent
    pub async fn create(&self, mut material: Material) -> Result<Material> {
        if material.embedding.is_none() {
            material.embedding = Some(self.embedder.embed(&material.embedding_text()).await?);
        }

        self.write_both_stores(&material).await?;
        self.invalidate_search_caches().await;
        self.cache_material(&material).await;
        Ok(material)
    }

    /// Chunked batch create with per-item outcomes; a failed item never
    /// aborts the batch
    pub async fn create_batch(&self, materials: Vec<Material>) -> Result<Vec<BatchOutcome>> {
        let mut outcomes = Vec::with_capacity(materials.len());

        for chunk in materials.chunks(self.batch_chunk_size) {
            let futures = chunk.iter().map(|material| {
                let material = material.clone();
                async move {
                    let id = material.id.clone();
                    match self.create_without_invalidation(material).await {
                        Ok(_) => BatchOutcome {
                            id,
                            success: true,
                            error: None,
                        },
                        Err(e) => BatchOutcome {
                            id,
                            success: false,
                            error: Some(e.to_string()),
                        },
                    }
                }
            });
            outcomes.extend(join_all(futures).await);
        }

        self.invalidate_search_caches().await;
        Ok(outcomes)
    }

    async fn create_without_invalidation(&self, mut material: Material) -> Result<Material> {
        if material.embedding.is_none() {
            material.embedding = Some(self.embedder.embed(&material.embedding_text()).await?);
        }
        self.write_both_stores(&material).await?;
        self.cache_material(&material).await;
        Ok(material)
    }

    /// Read-modify-write; the embedding regenerates iff an indexed field
    /// changed
    pub async fn update(&self, id: &str, patch: MaterialPatch) -> Result<Material> {
        let mut material = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::MaterialNotFound { id: id.to_string() })?;

        let before_indexed = (
            material.name.clone(),
            material.description.clone(),
            material.use_category.clone(),
            material.unit.clone(),
        );

        if let Some(name) = patch.name {
            material.name = name;
        }
        if let Some(description) = patch.description {
            material.description = Some(description);
        }
        if let Some(category) = patch.use_category {
            material.use_category = Some(category);
        }
        if let Some(unit) = patch.unit {
            material.unit = unit;
        }
        if let Some(sku) = patch.sku {
            material.sku = Some(sku);
        }

        let after_indexed = (
            material.name.clone(),
            material.description.clone(),
            material.use_category.clone(),
            material.unit.clone(),
        );
        if before_indexed != after_indexed || material.embedding.is_none() {
            material.embedding = Some(self.embedder.embed(&material.embedding_text()).await?);
        }
        material.updated_at = Utc::now();

        self.write_both_stores(&material).await?;
        self.cache.delete(&keys::material(id)).await.ok();
        self.invalidate_search_caches().await;
        self.cache_material(&material).await;
        Ok(material)
    }

    /// Remove from both stores and drop the caches
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.get(id).await?.is_some();
        if !existed {
            return Ok(false);
        }

        self.vector
            .delete(&self.collection, &[id.to_string()])
            .await?;

        if let Some(sql) = &self.sql {
            let sql = Arc::clone(sql);
            let id_owned = id.to_string();
            let result = self
                .with_sql_retries(|| {
                    let sql = Arc::clone(&sql);
                    let id = id_owned.clone();
                    async move { sql.delete_material(&id).await.map(|_| ()) }
                })
                .await;
            if let Err(e) = result {
                self.emit_reconcile_event("delete", id, serde_json::Value::Null)
                    .await;
                warn!(error = %e, id, "SQL delete failed, reconciliation queued");
            }
        }

        self.cache.delete(&keys::material(id)).await.ok();
        self.invalidate_search_caches().await;
        Ok(true)
    }

    /// Search through the engine with a 5-minute cached response keyed by
    /// the canonical query hash; concurrent identical misses collapse
    pub async fn search(&self, query: &AdvancedQuery) -> Result<SearchResponse> {
        // Validation errors must not be masked by a cache lookup
        query.validate()?;

        let key = keys::search(&query.cache_hash());
        let engine = Arc::clone(&self.engine);
        let query = query.clone();
        self.cache
            .get_or_load(
                "search",
                &key,
                Duration::from_secs(self.ttl.search_secs),
                Duration::from_secs(30),
                move || async move { engine.search(&query).await },
            )
            .await
    }

    /// Vector write first (authoritative), then best-effort SQL mirror
    async fn write_both_stores(&self, material: &Material) -> Result<()> {
        let record = VectorRecord {
            id: material.id.clone(),
            vector: material.embedding.clone(),
            payload: material_to_payload(material),
        };
        self.vector.upsert(&self.collection, vec![record]).await?;

        if let Some(sql) = &self.sql {
            let sql = Arc::clone(sql);
            let material_owned = material.clone();
            let has_embedding = material.embedding.is_some();
            let result = self
                .with_sql_retries(|| {
                    let sql = Arc::clone(&sql);
                    let material = material_owned.clone();
                    async move { sql.upsert_material(&material, has_embedding).await }
                })
                .await;
            if let Err(e) = result {
                self.emit_reconcile_event(
                    "upsert",
                    &material.id,
                    material_to_payload(material),
                )
                .await;
                warn!(error = %e, id = %material.id, "SQL mirror failed, reconciliation queued");
            }
        }
        Ok(())
    }

    /// Up to three retries with 100/400/1600 ms delays and ±20% jitter
    async fn with_sql_retries<F, Fut>(&self, mut operation: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_error = None;
        for (attempt, base_ms) in std::iter::once(&0u64)
            .chain(SQL_RETRY_DELAYS_MS.iter())
            .enumerate()
        {
            if *base_ms > 0 {
                let jitter = rand::thread_rng().gen_range(0.8..1.2);
                let delay = Duration::from_millis((*base_ms as f64 * jitter) as u64);
                tokio::time::sleep(delay).await;
            }
            match operation().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt < SQL_RETRY_DELAYS_MS.len() {
                        warn!(attempt = attempt + 1, error = %e, "SQL write failed, retrying");
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(AppError::BackendsUnavailable))
    }

    /// Reads never block on reconciliation; the event is parked durably
    /// for the out-of-band reconciler
    async fn emit_reconcile_event(&self, op: &str, id: &str, payload: serde_json::Value) {
        let event = ReconcileEvent {
            op: op.to_string(),
            id: id.to_string(),
            payload,
        };
        let key = format!("reconcile:{}", Uuid::new_v4());
        if let Err(e) = self
            .cache
            .set(&key, &event, Duration::from_secs(7 * 24 * 3600))
            .await
        {
            warn!(error = %e, op, id, "Failed to persist reconciliation event");
        } else {
            info!(op, id, "Reconciliation event queued");
        }
    }

    async fn cache_material(&self, material: &Material) {
        // Cached copies never carry the vector
        let stripped = Material {
            embedding: None,
            ..material.clone()
        };
        if let Err(e) = self
            .cache
            .set(
                &keys::material(&material.id),
                &stripped,
                Duration::from_secs(self.ttl.material_secs),
            )
            .await
        {
            warn!(error = %e, id = %material.id, "Failed to cache material");
        }
    }

    /// Any mutation drops the derived caches within the scan budget;
    /// stragglers age out via TTL
    async fn invalidate_search_caches(&self) {
        for pattern in ["search:*", "suggest:*"] {
            if let Err(e) = self.cache.delete_pattern(pattern, INVALIDATION_BUDGET).await {
                warn!(error = %e, pattern, "Cache invalidation failed");
            }
        }
    }
}
