//! Hybrid search engine
//!
//! Answers `AdvancedQuery -> SearchResponse` in one of four modes:
//! - vector: embed the text and run filtered nearest-neighbor recall
//! - sql: exact/LIKE/trigram matching in the relational store
//! - fuzzy: Levenshtein/LCS scoring over candidate records
//! - hybrid: vector and sql in parallel, fused by id
//!
//! Filtering, sorting, pagination, highlighting, and analytics are applied
//! uniformly after the mode-specific retrieval.

use crate::analytics::AnalyticsRecorder;
use crate::cursor::{CursorCodec, CursorPayload};
use crate::fusion::{fuse, FusionWeights, Hit};
use crate::fuzzy;
use crate::highlight;
use crate::payload::material_from_payload;
use crate::query::{
    AdvancedQuery, Pagination, SearchFilters, SearchMode, SortDirection, SortField, SortKey,
};
use crate::suggest::SuggestService;
use matforge_common::config::SearchConfig;
use matforge_common::db::{SqlBackend, SqlSearchRequest};
use matforge_common::embeddings::Embedder;
use matforge_common::errors::{AppError, Result};
use matforge_common::metrics;
use matforge_common::model::Material;
use matforge_common::vector::{PayloadFilter, VectorStore};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Vector recall depth cap
const MAX_RECALL_K: usize = 300;

/// Candidate pool pulled for fuzzy scoring
const FUZZY_CANDIDATES: usize = 1_000;

/// Highlighted copies of the matchable fields; SKU is never highlighted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Highlights {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_category: Option<String>,
}

/// One row of a search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    #[serde(flatten)]
    pub material: Material,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Highlights>,
}

/// The search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub degraded: bool,
    pub mode: SearchMode,
    pub duration_ms: u64,
}

/// The hybrid search engine
pub struct SearchEngine {
    vector: Arc<dyn VectorStore>,
    sql: Option<Arc<dyn SqlBackend>>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    config: SearchConfig,
    cursor: CursorCodec,
    analytics: AnalyticsRecorder,
    suggest: Arc<SuggestService>,
}

impl SearchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        sql: Option<Arc<dyn SqlBackend>>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        config: SearchConfig,
        analytics: AnalyticsRecorder,
        suggest: Arc<SuggestService>,
    ) -> Self {
        Self {
            vector,
            sql,
            embedder,
            collection,
            config,
            cursor: CursorCodec::new(),
            analytics,
            suggest,
        }
    }

    pub fn suggest_service(&self) -> &Arc<SuggestService> {
        &self.suggest
    }

    /// Execute one query
    pub async fn search(&self, query: &AdvancedQuery) -> Result<SearchResponse> {
        query.validate()?;
        let start = Instant::now();

        let (mut hits, degraded) = match query.mode {
            SearchMode::Vector => (self.vector_hits(query).await?, false),
            SearchMode::Sql => (self.sql_hits(query).await?, false),
            SearchMode::Fuzzy => (self.fuzzy_hits(query).await?, false),
            SearchMode::Hybrid => self.hybrid_hits(query).await?,
        };

        // Uniform post-filter; pushdown-capable predicates are idempotent
        hits.retain(|hit| matches_filters(&hit.material, &query.filters));

        let effective_max = query.options.max_results.min(self.config.max_results);
        let sort = effective_sort(&query.sort);
        hits.sort_by(|a, b| compare_hits(a, b, &sort));
        hits.truncate(effective_max);

        let total = hits.len();
        let (window, next_cursor) = self.paginate(&hits, query, &sort)?;

        let text = query.normalized_text();
        let items = self.build_items(window, query, &text);

        let duration_ms = start.elapsed().as_millis() as u64;
        let response = SearchResponse {
            items,
            total: query.options.include_total.then_some(total),
            next_cursor,
            degraded,
            mode: query.mode,
            duration_ms,
        };

        // Analytics and suggestions never affect the response
        self.analytics.record(
            query.query_hash(),
            query.mode.as_str(),
            duration_ms,
            response.items.len(),
        );
        if !text.is_empty() {
            self.suggest.record_query(&text);
        }
        metrics::record_search(
            duration_ms as f64 / 1000.0,
            query.mode.as_str(),
            response.items.len(),
            degraded,
        );

        debug!(
            mode = query.mode.as_str(),
            results = response.items.len(),
            degraded,
            duration_ms,
            "Search completed"
        );
        Ok(response)
    }

    async fn vector_hits(&self, query: &AdvancedQuery) -> Result<Vec<Hit>> {
        let text = query.normalized_text();
        // The user asked for semantic results: embedding failure is
        // surfaced, never silently replaced by SQL
        let embedding = self.embedder.embed(&text).await?;

        let limit = query.options.max_results.min(self.config.max_results);
        let k = (limit * 3).clamp(1, MAX_RECALL_K);
        let filter = payload_filter(&query.filters);

        let scored = self
            .vector
            .search(&self.collection, &embedding, filter.as_ref(), k)
            .await?;

        let threshold = query
            .filters
            .similarity_threshold
            .unwrap_or(self.config.vector_similarity_threshold);

        Ok(scored
            .into_iter()
            .filter(|record| record.score >= threshold)
            .filter_map(|record| {
                material_from_payload(&record.payload).map(|material| Hit {
                    material,
                    score: record.score,
                })
            })
            .collect())
    }

    async fn sql_hits(&self, query: &AdvancedQuery) -> Result<Vec<Hit>> {
        let sql = self.sql.as_ref().ok_or(AppError::BackendsUnavailable)?;

        let request = SqlSearchRequest {
            text: query.text.clone().filter(|t| !t.trim().is_empty()),
            categories: query.filters.categories.clone(),
            units: query.filters.units.clone(),
            sku_pattern: query.filters.sku_pattern.clone(),
            created_from: query.filters.created_from,
            created_to: query.filters.created_to,
            updated_from: query.filters.updated_from,
            updated_to: query.filters.updated_to,
            limit: query.options.max_results.min(self.config.max_results),
        };

        let hits = sql.search_materials(&request).await?;
        Ok(hits
            .into_iter()
            .map(|hit| Hit {
                material: hit.material,
                score: hit.score,
            })
            .collect())
    }

    async fn fuzzy_hits(&self, query: &AdvancedQuery) -> Result<Vec<Hit>> {
        let text = query.normalized_text();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // Candidate pool: the relational store when present, otherwise a
        // bounded scan of the vector collection's payloads
        let candidates: Vec<Material> = match &self.sql {
            Some(sql) => {
                let request = SqlSearchRequest {
                    text: None,
                    categories: query.filters.categories.clone(),
                    units: query.filters.units.clone(),
                    sku_pattern: query.filters.sku_pattern.clone(),
                    created_from: query.filters.created_from,
                    created_to: query.filters.created_to,
                    updated_from: query.filters.updated_from,
                    updated_to: query.filters.updated_to,
                    limit: FUZZY_CANDIDATES,
                };
                sql.search_materials(&request)
                    .await?
                    .into_iter()
                    .map(|hit| hit.material)
                    .collect()
            }
            None => {
                let filter = payload_filter(&query.filters);
                self.vector
                    .scroll(&self.collection, filter.as_ref(), FUZZY_CANDIDATES)
                    .await?
                    .into_iter()
                    .filter_map(|record| material_from_payload(&record.payload))
                    .collect()
            }
        };

        let threshold = query
            .filters
            .similarity_threshold
            .unwrap_or(self.config.fuzzy_similarity_threshold);

        Ok(candidates
            .into_iter()
            .filter_map(|material| {
                let score = fuzzy::record_score(&material, &text);
                (score >= threshold).then_some(Hit { material, score })
            })
            .collect())
    }

    async fn hybrid_hits(&self, query: &AdvancedQuery) -> Result<(Vec<Hit>, bool)> {
        let weights = FusionWeights {
            vector: self.config.hybrid_vector_weight,
            sql: self.config.hybrid_sql_weight,
        };

        let (vector_side, sql_side) =
            tokio::join!(self.vector_hits(query), self.sql_hits(query));

        match (vector_side, sql_side) {
            (Ok(vector), Ok(sql)) => Ok((fuse(vector, sql, weights), false)),
            (Ok(vector), Err(e)) => {
                warn!(error = %e, "SQL side unavailable, degrading to vector-only");
                Ok((fuse(vector, Vec::new(), weights), true))
            }
            (Err(e), Ok(sql)) => {
                warn!(error = %e, "Vector side unavailable, degrading to SQL-only");
                Ok((fuse(Vec::new(), sql, weights), true))
            }
            (Err(vector_err), Err(sql_err)) => {
                warn!(
                    vector_error = %vector_err,
                    sql_error = %sql_err,
                    "Both search backends unavailable"
                );
                Err(AppError::BackendsUnavailable)
            }
        }
    }

    fn paginate<'a>(
        &self,
        hits: &'a [Hit],
        query: &AdvancedQuery,
        sort: &[SortKey],
    ) -> Result<(&'a [Hit], Option<String>)> {
        let (window, has_more) = match &query.pagination {
            Pagination::Page { page, size } => {
                let offset = (page - 1) * size;
                let end = (offset + size).min(hits.len());
                let window = if offset >= hits.len() {
                    &hits[0..0]
                } else {
                    &hits[offset..end]
                };
                (window, end < hits.len())
            }
            Pagination::Cursor { cursor, size } => {
                let payload = self.cursor.decode(cursor)?;
                let start = hits
                    .iter()
                    .position(|hit| compare_to_cursor(hit, &payload, sort) == Ordering::Greater)
                    .unwrap_or(hits.len());
                let end = (start + size).min(hits.len());
                (&hits[start..end], end < hits.len())
            }
        };

        let next_cursor = if has_more {
            window
                .last()
                .map(|last| {
                    self.cursor.encode(&CursorPayload {
                        keys: sort.iter().map(|key| sort_value(last, key.field)).collect(),
                        last_id: last.material.id.clone(),
                    })
                })
                .transpose()?
        } else {
            None
        };

        Ok((window, next_cursor))
    }

    fn build_items(
        &self,
        window: &[Hit],
        query: &AdvancedQuery,
        text: &str,
    ) -> Vec<SearchResultItem> {
        let terms = if query.options.highlight && !text.is_empty() {
            highlight::terms(text)
        } else {
            Vec::new()
        };

        window
            .iter()
            .map(|hit| {
                let highlights = if terms.is_empty() {
                    None
                } else {
                    Some(self.highlight_material(&hit.material, &terms))
                };
                SearchResultItem {
                    material: Material {
                        embedding: None,
                        ..hit.material.clone()
                    },
                    score: hit.score,
                    highlights,
                }
            })
            .collect()
    }

    fn highlight_material(&self, material: &Material, terms: &[String]) -> Highlights {
        let pre = &self.config.highlight_pre;
        let post = &self.config.highlight_post;
        let mark = |text: &str| {
            let marked = highlight::highlight(text, terms, pre, post);
            (marked != text).then_some(marked)
        };

        Highlights {
            name: mark(&material.name),
            description: material.description.as_deref().and_then(mark),
            use_category: material.use_category.as_deref().and_then(mark),
        }
    }
}

/// Effective sort: the requested keys, or relevance-descending by default
fn effective_sort(sort: &[SortKey]) -> Vec<SortKey> {
    if sort.is_empty() {
        vec![SortKey::desc(SortField::Relevance)]
    } else {
        sort.to_vec()
    }
}

/// Glob match supporting `*` (any run) and `?` (any single char)
fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();

    // dp[j] = pattern[..i] matches value[..j]
    let mut dp = vec![false; v.len() + 1];
    dp[0] = true;
    for &pc in &p {
        let mut next = vec![false; v.len() + 1];
        if pc == '*' {
            let mut any = false;
            for j in 0..=v.len() {
                any |= dp[j];
                next[j] = any;
            }
        } else {
            for j in 0..v.len() {
                next[j + 1] = dp[j] && (pc == '?' || p_eq(pc, v[j]));
            }
        }
        dp = next;
    }
    dp[v.len()]
}

fn p_eq(a: char, b: char) -> bool {
    a.to_lowercase().eq(b.to_lowercase())
}

/// Apply every filter to one material
fn matches_filters(material: &Material, filters: &SearchFilters) -> bool {
    if !filters.categories.is_empty() {
        match &material.use_category {
            Some(category) if filters.categories.contains(category) => {}
            _ => return false,
        }
    }
    if !filters.units.is_empty() && !filters.units.contains(&material.unit) {
        return false;
    }
    if let Some(pattern) = &filters.sku_pattern {
        match &material.sku {
            Some(sku) if glob_match(pattern, sku) => {}
            _ => return false,
        }
    }
    if let Some(from) = filters.created_from {
        if material.created_at < from {
            return false;
        }
    }
    if let Some(to) = filters.created_to {
        if material.created_at >= to {
            return false;
        }
    }
    if let Some(from) = filters.updated_from {
        if material.updated_at < from {
            return false;
        }
    }
    if let Some(to) = filters.updated_to {
        if material.updated_at >= to {
            return false;
        }
    }
    true
}

/// Pushdown-able predicates for the vector store
fn payload_filter(filters: &SearchFilters) -> Option<PayloadFilter> {
    let filter = PayloadFilter::default()
        .any_of("use_category", filters.categories.clone())
        .any_of("unit", filters.units.clone())
        .range(
            "created_at_ts",
            filters.created_from.map(|dt| dt.timestamp() as f64),
            filters.created_to.map(|dt| dt.timestamp() as f64),
        )
        .range(
            "updated_at_ts",
            filters.updated_from.map(|dt| dt.timestamp() as f64),
            filters.updated_to.map(|dt| dt.timestamp() as f64),
        );
    (!filter.is_empty()).then_some(filter)
}

/// Ascending comparison for one sort field
fn field_cmp(a: &Hit, b: &Hit, field: SortField) -> Ordering {
    match field {
        SortField::Relevance => a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal),
        SortField::Name => a.material.name.cmp(&b.material.name),
        SortField::CreatedAt => a.material.created_at.cmp(&b.material.created_at),
        SortField::UpdatedAt => a.material.updated_at.cmp(&b.material.updated_at),
        SortField::UseCategory => a.material.use_category.cmp(&b.material.use_category),
        SortField::Unit => a.material.unit.cmp(&b.material.unit),
        SortField::Sku => a.material.sku.cmp(&b.material.sku),
    }
}

/// Full comparator over the ordered sort keys; ties break by newer
/// `updated_at` under relevance, and always finally by id
fn compare_hits(a: &Hit, b: &Hit, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = field_cmp(a, b, key.field);
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    if sort.iter().any(|key| key.field == SortField::Relevance) {
        let newer_first = b.material.updated_at.cmp(&a.material.updated_at);
        if newer_first != Ordering::Equal {
            return newer_first;
        }
    }
    a.material.id.cmp(&b.material.id)
}

/// The cursor-stored value of one sort field
fn sort_value(hit: &Hit, field: SortField) -> serde_json::Value {
    match field {
        SortField::Relevance => serde_json::json!(hit.score as f64),
        SortField::Name => serde_json::json!(hit.material.name),
        SortField::CreatedAt => serde_json::json!(hit.material.created_at.to_rfc3339()),
        SortField::UpdatedAt => serde_json::json!(hit.material.updated_at.to_rfc3339()),
        SortField::UseCategory => serde_json::json!(hit.material.use_category),
        SortField::Unit => serde_json::json!(hit.material.unit),
        SortField::Sku => serde_json::json!(hit.material.sku),
    }
}

fn cmp_json(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a
            .as_str()
            .unwrap_or_default()
            .cmp(b.as_str().unwrap_or_default()),
    }
}

/// Position of a hit relative to a decoded cursor in the sorted order
fn compare_to_cursor(hit: &Hit, cursor: &CursorPayload, sort: &[SortKey]) -> Ordering {
    for (key, cursor_value) in sort.iter().zip(cursor.keys.iter()) {
        let value = sort_value(hit, key.field);
        let ordering = cmp_json(&value, cursor_value);
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    hit.material.id.cmp(&cursor.last_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::material_to_payload;
    use crate::query::{SearchOptions, SortDirection};
    use async_trait::async_trait;
    use matforge_common::cache::{Cache, MemoryCache};
    use matforge_common::db::SqlHit;
    use matforge_common::model::{AnalyticsRecord, JobCounts, JobItem, PriceList};
    use matforge_common::vector::{MemoryVectorStore, VectorRecord};
    use std::collections::HashMap;

    const DIM: usize = 4;

    /// Embedder with engineered vectors per text; unknown texts embed to a
    /// far-away direction, and the whole provider can be switched off
    struct StubEmbedder {
        map: HashMap<String, Vec<f32>>,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail {
                return Err(AppError::EmbeddingUnavailable {
                    message: "provider down".to_string(),
                });
            }
            Ok(self
                .map
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0]))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "stub"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// In-memory SQL backend double: LIKE-style scoring, switchable outage
    struct FakeSql {
        materials: Vec<Material>,
        fail: bool,
    }

    #[async_trait]
    impl SqlBackend for FakeSql {
        async fn ping(&self) -> Result<()> {
            if self.fail {
                return Err(AppError::DatabaseConnection {
                    message: "down".to_string(),
                });
            }
            Ok(())
        }

        async fn upsert_material(&self, _material: &Material, _has_embedding: bool) -> Result<()> {
            Ok(())
        }

        async fn get_material(&self, id: &str) -> Result<Option<Material>> {
            Ok(self.materials.iter().find(|m| m.id == id).cloned())
        }

        async fn get_materials(&self, ids: &[String]) -> Result<Vec<Material>> {
            Ok(self
                .materials
                .iter()
                .filter(|m| ids.contains(&m.id))
                .cloned()
                .collect())
        }

        async fn delete_material(&self, _id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn search_materials(&self, request: &SqlSearchRequest) -> Result<Vec<SqlHit>> {
            if self.fail {
                return Err(AppError::DatabaseConnection {
                    message: "down".to_string(),
                });
            }
            let needle = request.text.as_deref().map(str::to_lowercase);
            let hits = self
                .materials
                .iter()
                .filter(|m| request.units.is_empty() || request.units.contains(&m.unit))
                .filter_map(|m| {
                    let score = match &needle {
                        None => 0.0,
                        Some(needle) => {
                            let mut best = 0.0f32;
                            if m.name.to_lowercase().contains(needle.as_str()) {
                                best = best.max(0.4);
                            }
                            if m.description
                                .as_deref()
                                .is_some_and(|d| d.to_lowercase().contains(needle.as_str()))
                            {
                                best = best.max(0.3);
                            }
                            if best == 0.0 {
                                return None;
                            }
                            best
                        }
                    };
                    Some(SqlHit {
                        material: m.clone(),
                        score,
                    })
                })
                .take(request.limit.max(1))
                .collect();
            Ok(hits)
        }

        async fn material_names_matching(&self, _n: &str, _l: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn categories_matching(&self, _n: &str, _l: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn create_job(&self, _r: &str, _items: &[JobItem]) -> Result<()> {
            Ok(())
        }

        async fn update_job_item(&self, _r: &str, _item: &JobItem) -> Result<()> {
            Ok(())
        }

        async fn job_counts(&self, _r: &str) -> Result<Option<JobCounts>> {
            Ok(None)
        }

        async fn job_items(&self, _r: &str) -> Result<Vec<JobItem>> {
            Ok(Vec::new())
        }

        async fn insert_price_list(&self, _l: &PriceList) -> Result<()> {
            Ok(())
        }

        async fn latest_price_list(&self, _s: &str) -> Result<Option<PriceList>> {
            Ok(None)
        }

        async fn delete_supplier_prices(&self, _s: &str) -> Result<u64> {
            Ok(0)
        }

        async fn insert_analytics(&self, _r: &AnalyticsRecord) -> Result<()> {
            Ok(())
        }

        async fn query_analytics(&self, _f: &str, _t: &str) -> Result<Vec<AnalyticsRecord>> {
            Ok(Vec::new())
        }
    }

    struct EngineBuilder {
        materials: Vec<(Material, Vec<f32>)>,
        embeddings: HashMap<String, Vec<f32>>,
        sql: Option<FakeSql>,
        embedder_fail: bool,
    }

    impl EngineBuilder {
        fn new() -> Self {
            Self {
                materials: Vec::new(),
                embeddings: HashMap::new(),
                sql: None,
                embedder_fail: false,
            }
        }

        fn material(mut self, material: Material, vector: Vec<f32>) -> Self {
            self.materials.push((material, vector));
            self
        }

        fn query_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.embeddings.insert(text.to_string(), vector);
            self
        }

        fn with_sql(mut self, fail: bool) -> Self {
            let materials = self.materials.iter().map(|(m, _)| m.clone()).collect();
            self.sql = Some(FakeSql { materials, fail });
            self
        }

        fn embedder_down(mut self) -> Self {
            self.embedder_fail = true;
            self
        }

        async fn build(self) -> SearchEngine {
            let store = Arc::new(MemoryVectorStore::new());
            store.ensure_collection("materials", DIM).await.unwrap();
            let records = self
                .materials
                .iter()
                .map(|(material, vector)| VectorRecord {
                    id: material.id.clone(),
                    vector: Some(vector.clone()),
                    payload: material_to_payload(material),
                })
                .collect();
            store.upsert("materials", records).await.unwrap();

            let cache = Cache::new(Arc::new(MemoryCache::new()));
            let sql: Option<Arc<dyn SqlBackend>> =
                self.sql.map(|sql| Arc::new(sql) as Arc<dyn SqlBackend>);
            let (analytics, _handle) = AnalyticsRecorder::start(sql.clone(), cache.clone());
            let suggest = Arc::new(SuggestService::new(
                cache,
                sql.clone(),
                store.clone() as Arc<dyn VectorStore>,
                "materials".to_string(),
                std::time::Duration::from_secs(3600),
            ));

            SearchEngine::new(
                store,
                sql,
                Arc::new(StubEmbedder {
                    map: self.embeddings,
                    fail: self.embedder_fail,
                }),
                "materials".to_string(),
                SearchConfig::default(),
                analytics,
                suggest,
            )
        }
    }

    fn query(mode: SearchMode, text: &str) -> AdvancedQuery {
        AdvancedQuery {
            text: (!text.is_empty()).then(|| text.to_string()),
            mode,
            filters: SearchFilters::default(),
            sort: Vec::new(),
            pagination: Pagination::default(),
            options: SearchOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_vector_mode_ranks_by_similarity() {
        let engine = EngineBuilder::new()
            .material(Material::new("near", "Кирпич белый", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .material(Material::new("far", "Цемент", "кг"), vec![0.0, 1.0, 0.0, 0.0])
            .query_vector("белый кирпич", vec![0.95, 0.2, 0.0, 0.0])
            .build()
            .await;

        let response = engine
            .search(&query(SearchMode::Vector, "белый кирпич"))
            .await
            .unwrap();
        assert_eq!(response.items[0].material.id, "near");
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_vector_mode_threshold_drops_weak_hits() {
        let engine = EngineBuilder::new()
            .material(Material::new("weak", "Цемент", "кг"), vec![0.0, 1.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.filters.similarity_threshold = Some(0.5);
        let response = engine.search(&q).await.unwrap();
        assert!(response.items.is_empty());
    }

    #[tokio::test]
    async fn test_vector_mode_requires_text() {
        let engine = EngineBuilder::new().build().await;
        let err = engine
            .search(&query(SearchMode::Vector, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_embedding_outage_fails_vector_mode_without_fallback() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .with_sql(false)
            .embedder_down()
            .build()
            .await;

        let err = engine
            .search(&query(SearchMode::Vector, "кирпич"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmbeddingUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_sql_mode_without_backend_is_unavailable() {
        let engine = EngineBuilder::new().build().await;
        let err = engine
            .search(&query(SearchMode::Sql, "кирпич"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BackendsUnavailable));
    }

    #[tokio::test]
    async fn test_fuzzy_recall_of_misspelled_query() {
        let engine = EngineBuilder::new()
            .material(Material::new("m-1", "Цемент М500", "кг"), vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let response = engine
            .search(&query(SearchMode::Fuzzy, "цимент м500"))
            .await
            .unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].material.id, "m-1");
        assert!(response.items[0].score >= 0.8);
    }

    #[tokio::test]
    async fn test_hybrid_fusion_ranks_confirmed_semantic_match_first() {
        // "Кирпич керамический белый" matches semantically (vector 0.9)
        // and weakly lexically; "Белый список материалов" matches the
        // lexical needle only
        let semantic = Material::new("semantic", "Кирпич керамический белый", "шт");
        let lexical = Material::new("lexical", "белый кирпич (каталог)", "шт");

        let engine = EngineBuilder::new()
            .material(semantic, vec![0.9, 0.1, 0.0, 0.0])
            .material(lexical, vec![0.0, 0.0, 1.0, 0.0])
            .query_vector("белый кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .with_sql(false)
            .build()
            .await;

        let response = engine
            .search(&query(SearchMode::Hybrid, "белый кирпич"))
            .await
            .unwrap();

        let ids: Vec<&str> = response
            .items
            .iter()
            .map(|item| item.material.id.as_str())
            .collect();
        assert!(ids.contains(&"semantic"));
        assert!(ids.contains(&"lexical"));
        assert_eq!(ids[0], "semantic");
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_hybrid_degrades_when_sql_down() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .with_sql(true)
            .build()
            .await;

        let response = engine
            .search(&query(SearchMode::Hybrid, "кирпич"))
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(response.items[0].material.id, "a");
    }

    #[tokio::test]
    async fn test_hybrid_degrades_to_sql_when_embedding_down() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .with_sql(false)
            .embedder_down()
            .build()
            .await;

        let response = engine
            .search(&query(SearchMode::Hybrid, "кирпич"))
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(response.items[0].material.id, "a");
    }

    #[tokio::test]
    async fn test_hybrid_with_both_sides_down_fails() {
        let engine = EngineBuilder::new()
            .with_sql(true)
            .embedder_down()
            .build()
            .await;

        let err = engine
            .search(&query(SearchMode::Hybrid, "кирпич"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BackendsUnavailable));
    }

    #[tokio::test]
    async fn test_unit_filter_applies() {
        let engine = EngineBuilder::new()
            .material(Material::new("pcs", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .material(Material::new("kg", "Кирпичная крошка", "кг"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.filters.units = vec!["кг".to_string()];
        let response = engine.search(&q).await.unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].material.id, "kg");
    }

    #[tokio::test]
    async fn test_sku_glob_filter() {
        let mut with_sku = Material::new("a", "Кирпич", "шт");
        with_sku.sku = Some("BRK-001".to_string());
        let mut other_sku = Material::new("b", "Кирпич облицовочный", "шт");
        other_sku.sku = Some("CEM-777".to_string());

        let engine = EngineBuilder::new()
            .material(with_sku, vec![1.0, 0.0, 0.0, 0.0])
            .material(other_sku, vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.filters.sku_pattern = Some("BRK-*".to_string());
        let response = engine.search(&q).await.unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].material.sku.as_deref(), Some("BRK-001"));
    }

    #[tokio::test]
    async fn test_zero_size_page_reports_total() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.pagination = Pagination::Page { page: 1, size: 0 };
        q.options.include_total = true;
        let response = engine.search(&q).await.unwrap();
        assert!(response.items.is_empty());
        assert_eq!(response.total, Some(1));
    }

    #[tokio::test]
    async fn test_cursor_pagination_covers_all_rows_without_overlap() {
        let mut builder = EngineBuilder::new().query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0]);
        for i in 0..7 {
            builder = builder.material(
                Material::new(format!("m-{i}"), format!("Кирпич {i}"), "шт"),
                vec![1.0, 0.0, 0.0, 0.0],
            );
        }
        let engine = builder.build().await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.sort = vec![SortKey::asc(SortField::Name)];
        q.pagination = Pagination::Page { page: 1, size: 3 };

        let first = engine.search(&q).await.unwrap();
        assert_eq!(first.items.len(), 3);
        let cursor = first.next_cursor.clone().expect("more rows exist");

        let mut seen: Vec<String> = first
            .items
            .iter()
            .map(|item| item.material.id.clone())
            .collect();

        let mut token = cursor;
        loop {
            q.pagination = Pagination::Cursor {
                cursor: token.clone(),
                size: 3,
            };
            let page = engine.search(&q).await.unwrap();
            for item in &page.items {
                assert!(!seen.contains(&item.material.id), "row repeated across pages");
                seen.push(item.material.id.clone());
            }
            match page.next_cursor {
                Some(next) => token = next,
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_invalid_cursor_rejected() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.pagination = Pagination::Cursor {
            cursor: "forged.cursor".to_string(),
            size: 10,
        };
        let err = engine.search(&q).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCursor));
    }

    #[tokio::test]
    async fn test_highlighting_marks_terms() {
        let engine = EngineBuilder::new()
            .material(Material::new("a", "Кирпич керамический", "шт"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("кирпич", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "кирпич");
        q.options.highlight = true;
        let response = engine.search(&q).await.unwrap();
        assert_eq!(
            response.items[0].highlights.as_ref().unwrap().name.as_deref(),
            Some("‹mark›Кирпич‹/mark› керамический")
        );
    }

    #[tokio::test]
    async fn test_sort_by_name_ascending() {
        let engine = EngineBuilder::new()
            .material(Material::new("b", "Бетон", "м3"), vec![1.0, 0.0, 0.0, 0.0])
            .material(Material::new("a", "Арматура", "т"), vec![1.0, 0.0, 0.0, 0.0])
            .query_vector("материал", vec![1.0, 0.0, 0.0, 0.0])
            .build()
            .await;

        let mut q = query(SearchMode::Vector, "материал");
        q.sort = vec![SortKey {
            field: SortField::Name,
            direction: SortDirection::Asc,
        }];
        let response = engine.search(&q).await.unwrap();
        assert_eq!(response.items[0].material.name, "Арматура");
        assert_eq!(response.items[1].material.name, "Бетон");
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("SKU-*", "SKU-001"));
        assert!(glob_match("SKU-??", "SKU-42"));
        assert!(!glob_match("SKU-??", "SKU-421"));
        assert!(glob_match("*-001", "BRK-001"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("SKU-*", "BRK-001"));
    }
}
