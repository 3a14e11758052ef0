//! Search suggestions
//!
//! Combines three sources: recent popular queries matching the prefix,
//! material names containing it, and categories matching it. Sources are
//! interleaved round-robin, duplicates removed by lowercase form, and the
//! result is cached for an hour.

use matforge_common::cache::{keys, Cache};
use matforge_common::db::SqlBackend;
use matforge_common::errors::Result;
use matforge_common::vector::VectorStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Hard cap on returned suggestions
pub const MAX_SUGGESTIONS: usize = 20;

/// How many recent query texts are remembered for the popular source
const POPULAR_CAP: usize = 1_000;

/// Page pulled from the vector store when SQL is unavailable
const SCROLL_PAGE: usize = 1_000;

pub struct SuggestService {
    cache: Cache,
    sql: Option<Arc<dyn SqlBackend>>,
    vector: Arc<dyn VectorStore>,
    collection: String,
    ttl: Duration,
    popular: Mutex<HashMap<String, u64>>,
}

impl SuggestService {
    pub fn new(
        cache: Cache,
        sql: Option<Arc<dyn SqlBackend>>,
        vector: Arc<dyn VectorStore>,
        collection: String,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            sql,
            vector,
            collection,
            ttl,
            popular: Mutex::new(HashMap::new()),
        }
    }

    /// Remember a query text for the popular-queries source
    pub fn record_query(&self, text: &str) {
        let folded = text.trim().to_lowercase();
        if folded.is_empty() {
            return;
        }
        let mut popular = self.popular.lock().expect("popular queries");
        if popular.len() >= POPULAR_CAP && !popular.contains_key(&folded) {
            // Evict the least used entry to stay bounded
            if let Some(coldest) = popular
                .iter()
                .min_by_key(|(_, count)| **count)
                .map(|(text, _)| text.clone())
            {
                popular.remove(&coldest);
            }
        }
        *popular.entry(folded).or_insert(0) += 1;
    }

    fn popular_matching(&self, prefix: &str) -> Vec<String> {
        let popular = self.popular.lock().expect("popular queries");
        let mut matching: Vec<(String, u64)> = popular
            .iter()
            .filter(|(text, _)| text.starts_with(prefix))
            .map(|(text, count)| (text.clone(), *count))
            .collect();
        matching.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        matching.into_iter().map(|(text, _)| text).collect()
    }

    async fn names_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        if let Some(sql) = &self.sql {
            return sql.material_names_matching(needle, limit).await;
        }

        // Vector-only deployment: scan one bounded page of payloads
        let records = self.vector.scroll(&self.collection, None, SCROLL_PAGE).await?;
        let mut names: Vec<String> = records
            .into_iter()
            .filter_map(|record| {
                record
                    .payload
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .filter(|name| name.to_lowercase().contains(needle))
            .collect();
        names.sort();
        names.truncate(limit);
        Ok(names)
    }

    async fn categories_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        if let Some(sql) = &self.sql {
            return sql.categories_matching(needle, limit).await;
        }

        let records = self.vector.scroll(&self.collection, None, SCROLL_PAGE).await?;
        let mut seen = HashSet::new();
        let mut categories = Vec::new();
        for record in records {
            if let Some(category) = record.payload.get("use_category").and_then(|v| v.as_str()) {
                if category.to_lowercase().contains(needle)
                    && seen.insert(category.to_lowercase())
                {
                    categories.push(category.to_string());
                }
            }
        }
        categories.sort();
        categories.truncate(limit);
        Ok(categories)
    }

    /// Suggest completions for a prefix
    pub async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let folded = prefix.trim().to_lowercase();
        if folded.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.min(MAX_SUGGESTIONS);

        let cache_key = keys::suggest(&folded);
        if let Some(cached) = self.cache.get::<Vec<String>>(&cache_key).await? {
            return Ok(cached.into_iter().take(limit).collect());
        }

        let popular = self.popular_matching(&folded);
        let names = self.names_matching(&folded, MAX_SUGGESTIONS).await?;
        let categories = self.categories_matching(&folded, MAX_SUGGESTIONS).await?;

        let merged = interleave(&[popular, names, categories], limit);

        if let Err(e) = self.cache.set(&cache_key, &merged, self.ttl).await {
            tracing::warn!(error = %e, "Failed to cache suggestions");
        }
        Ok(merged)
    }
}

/// Round-robin interleave with lowercase dedup
fn interleave(sources: &[Vec<String>], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let longest = sources.iter().map(Vec::len).max().unwrap_or(0);

    for idx in 0..longest {
        for source in sources {
            if let Some(candidate) = source.get(idx) {
                if out.len() >= limit {
                    return out;
                }
                if seen.insert(candidate.to_lowercase()) {
                    out.push(candidate.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::cache::MemoryCache;
    use matforge_common::vector::{MemoryVectorStore, VectorRecord};
    use serde_json::json;

    async fn service_with_materials(names: &[(&str, Option<&str>)]) -> SuggestService {
        let store = Arc::new(MemoryVectorStore::new());
        store.ensure_collection("materials", 2).await.unwrap();
        let records = names
            .iter()
            .enumerate()
            .map(|(i, (name, category))| VectorRecord {
                id: format!("m-{i}"),
                vector: Some(vec![1.0, 0.0]),
                payload: json!({
                    "id": format!("m-{i}"),
                    "name": name,
                    "use_category": category,
                }),
            })
            .collect();
        store.upsert("materials", records).await.unwrap();

        SuggestService::new(
            Cache::new(Arc::new(MemoryCache::new())),
            None,
            store,
            "materials".to_string(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_interleave_round_robin_dedup() {
        let merged = interleave(
            &[
                vec!["кирпич красный".to_string(), "кирпич белый".to_string()],
                vec!["Кирпич красный".to_string(), "Кирпич шамотный".to_string()],
                vec!["Кирпичи".to_string()],
            ],
            10,
        );
        // Same lowercase form appears once; round-robin order preserved
        assert_eq!(
            merged,
            vec![
                "кирпич красный".to_string(),
                "Кирпичи".to_string(),
                "кирпич белый".to_string(),
                "Кирпич шамотный".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_suggest_combines_sources() {
        let service = service_with_materials(&[
            ("Кирпич керамический", Some("кирпич строительный")),
            ("Цемент М500", Some("вяжущие")),
        ])
        .await;
        service.record_query("кирпич облицовочный");

        let suggestions = service.suggest("кирпич", 10).await.unwrap();
        assert!(suggestions.contains(&"кирпич облицовочный".to_string()));
        assert!(suggestions.contains(&"Кирпич керамический".to_string()));
        assert!(suggestions.contains(&"кирпич строительный".to_string()));
    }

    #[tokio::test]
    async fn test_suggest_limit_respected() {
        let service = service_with_materials(&[]).await;
        for i in 0..30 {
            service.record_query(&format!("кирпич {i}"));
        }
        let suggestions = service.suggest("кирпич", 50).await.unwrap();
        assert!(suggestions.len() <= MAX_SUGGESTIONS);
    }

    #[tokio::test]
    async fn test_suggest_cached() {
        let service = service_with_materials(&[("Кирпич", None)]).await;
        let first = service.suggest("кир", 10).await.unwrap();

        // A query recorded after caching does not appear until expiry
        service.record_query("кирпичная кладка");
        let second = service.suggest("кир", 10).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_prefix_yields_nothing() {
        let service = service_with_materials(&[("Кирпич", None)]).await;
        assert!(service.suggest("  ", 10).await.unwrap().is_empty());
    }
}
