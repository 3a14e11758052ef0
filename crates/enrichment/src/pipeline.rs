//! Enrichment pipeline orchestration
//!
//! Stage A parses the raw record, stage B normalizes unit and color in
//! parallel, stage C produces the combined embedding, stage D resolves the
//! SKU. All stages are pure functions of their inputs plus the reference
//! collections; side effects stay in the caches.

use crate::combined::{text_hash, CombinedEmbeddingService};
use crate::normalize::RagNormalizer;
use crate::parser::MaterialParser;
use crate::sku::{SkuMatch, SkuSearch};
use matforge_common::cache::{keys, Cache};
use matforge_common::errors::Result;
use matforge_common::model::EnrichedMaterial;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Result of enriching a single item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    pub material_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub normalized_unit: String,
    pub unit_coefficient: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_color: Option<String>,
}

/// The four-stage enrichment pipeline
pub struct EnrichmentPipeline {
    parser: MaterialParser,
    normalizer: RagNormalizer,
    combined: CombinedEmbeddingService,
    sku: SkuSearch,
    cache: Cache,
    sku_cache_ttl: Duration,
}

impl EnrichmentPipeline {
    pub fn new(
        parser: MaterialParser,
        normalizer: RagNormalizer,
        combined: CombinedEmbeddingService,
        sku: SkuSearch,
        cache: Cache,
        sku_cache_ttl: Duration,
    ) -> Self {
        Self {
            parser,
            normalizer,
            combined,
            sku,
            cache,
            sku_cache_ttl,
        }
    }

    /// Run all four stages for one item
    #[instrument(skip(self), fields(material_id = %material_id))]
    pub async fn enrich(
        &self,
        material_id: &str,
        name: &str,
        unit: &str,
    ) -> Result<EnrichmentOutcome> {
        let start = Instant::now();

        // Stage A: parse
        let parsed = self.parser.parse(name, unit).await?;

        // Stage B: normalize unit and color; the lookups are independent
        let normalized_unit = self
            .normalizer
            .normalize_unit(&parsed.parsed_unit, &parsed.embedding_unit)?;
        let normalized_color = self
            .normalizer
            .normalize_color(parsed.color.as_deref(), parsed.embedding_color.as_deref())?;

        // Stage C: combined embedding
        let embedding_combined = self
            .combined
            .get_or_generate(name, &normalized_unit, normalized_color.as_deref())
            .await?;

        // Stage D: SKU lookup, cached per combined-text hash
        let combined_text = EnrichedMaterial::combined_text(
            name,
            &normalized_unit,
            normalized_color.as_deref(),
        );
        let sku_key = keys::sku(&text_hash(&combined_text));
        let sku_match: Option<SkuMatch> = {
            let sku = &self.sku;
            let embedding = embedding_combined.clone();
            let unit = normalized_unit.clone();
            let color = normalized_color.clone();
            self.cache
                .get_or_load(
                    "sku",
                    &sku_key,
                    self.sku_cache_ttl,
                    Duration::from_secs(10),
                    move || async move { sku.find_sku(&embedding, &unit, color.as_deref()).await },
                )
                .await?
        };

        matforge_common::metrics::record_enrichment(
            start.elapsed().as_secs_f64(),
            sku_match.is_some(),
        );

        Ok(EnrichmentOutcome {
            material_id: material_id.to_string(),
            sku: sku_match.as_ref().map(|m| m.sku.clone()),
            similarity: sku_match.map(|m| m.similarity),
            normalized_unit,
            unit_coefficient: parsed.unit_coefficient,
            normalized_color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceService;
    use matforge_common::cache::MemoryCache;
    use matforge_common::config::EnrichmentConfig;
    use matforge_common::embeddings::{Embedder, MockEmbedder};
    use matforge_common::errors::AppError;
    use matforge_common::vector::{MemoryVectorStore, VectorRecord, VectorStore};
    use serde_json::json;

    const DIM: usize = 64;

    /// Catalog fixture: (sku, text to embed, payload unit, payload color).
    /// The mock embedder is hash-based, so recall only hits when the
    /// catalog entry was embedded over the exact combined text the query
    /// produces.
    async fn pipeline_with_catalog(
        catalog: &[(&str, &str, &str, Option<&str>)],
    ) -> EnrichmentPipeline {
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIM));
        let reference = Arc::new(ReferenceService::seed(embedder.as_ref()).await.unwrap());
        let store = Arc::new(MemoryVectorStore::new());
        store.ensure_collection("reference_materials", DIM).await.unwrap();

        let mut records = Vec::new();
        for (sku, embed_text, unit, color) in catalog {
            records.push(VectorRecord {
                id: sku.to_string(),
                vector: Some(embedder.embed(embed_text).await.unwrap()),
                payload: json!({
                    "id": sku,
                    "sku": sku,
                    "normalized_unit": unit,
                    "normalized_color": color,
                }),
            });
        }
        store.upsert("reference_materials", records).await.unwrap();

        let cache = Cache::new(Arc::new(MemoryCache::new()));
        EnrichmentPipeline::new(
            MaterialParser::new(Arc::clone(&embedder), DIM),
            RagNormalizer::new(reference, EnrichmentConfig::default()),
            CombinedEmbeddingService::new(
                Arc::clone(&embedder),
                cache.clone(),
                Duration::from_secs(86_400),
                Duration::from_secs(5),
            ),
            SkuSearch::new(
                store,
                "reference_materials".to_string(),
                &EnrichmentConfig::default(),
            ),
            cache,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_two_stage_sku_resolution() {
        let query_text =
            EnrichedMaterial::combined_text("Кирпич керамический", "шт", None);
        // Both candidates recall at similarity ~1.0; the colored SKU-1
        // survives because the input color is null, while SKU-2 is
        // rejected on unit
        let pipeline = pipeline_with_catalog(&[
            ("SKU-1", query_text.as_str(), "шт", Some("красный")),
            ("SKU-2", query_text.as_str(), "кг", None),
        ])
        .await;

        let outcome = pipeline
            .enrich("m-1", "Кирпич керамический", "шт")
            .await
            .unwrap();
        assert_eq!(outcome.sku.as_deref(), Some("SKU-1"));
        assert_eq!(outcome.normalized_unit, "шт");
        assert_eq!(outcome.normalized_color, None);
        assert!(outcome.similarity.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn test_unknown_unit_fails_item() {
        let pipeline = pipeline_with_catalog(&[]).await;
        let err = pipeline
            .enrich("m-1", "Цемент М500", "двенадцать попугаев")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnitUnknown { .. }));
    }

    #[tokio::test]
    async fn test_no_candidate_yields_null_sku() {
        let pipeline = pipeline_with_catalog(&[]).await;
        let outcome = pipeline.enrich("m-1", "Цемент М500", "кг").await.unwrap();
        assert_eq!(outcome.sku, None);
        assert_eq!(outcome.similarity, None);
        assert_eq!(outcome.normalized_unit, "кг");
    }

    #[tokio::test]
    async fn test_color_extracted_and_normalized() {
        let query_text =
            EnrichedMaterial::combined_text("Кирпич белый", "шт", Some("белый"));
        let pipeline =
            pipeline_with_catalog(&[("SKU-W", query_text.as_str(), "шт", Some("белый"))]).await;

        let outcome = pipeline.enrich("m-1", "Кирпич белый", "шт").await.unwrap();
        assert_eq!(outcome.normalized_color.as_deref(), Some("белый"));
        assert_eq!(outcome.sku.as_deref(), Some("SKU-W"));
    }
}
