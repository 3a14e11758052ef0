//! SKU search service (pipeline stage D)
//!
//! Two-stage lookup against the reference-materials catalog: vector recall
//! first, then strict unit equality and the color-compatibility rule in
//! recall-rank order. The first surviving candidate supplies the SKU.

use matforge_common::config::EnrichmentConfig;
use matforge_common::errors::Result;
use matforge_common::vector::VectorStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A resolved SKU with its recall similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuMatch {
    pub sku: String,
    pub similarity: f32,
}

/// Stage D of the enrichment pipeline
pub struct SkuSearch {
    store: Arc<dyn VectorStore>,
    collection: String,
    recall_k: usize,
    min_cosine: f32,
    symmetric_color: bool,
}

impl SkuSearch {
    pub fn new(store: Arc<dyn VectorStore>, collection: String, config: &EnrichmentConfig) -> Self {
        Self {
            store,
            collection,
            recall_k: config.sku_recall_k,
            min_cosine: config.sku_min_cosine,
            symmetric_color: config.symmetric_color,
        }
    }

    /// Accept or reject a candidate color against the input color.
    ///
    /// The default rule is asymmetric: a null input accepts any candidate,
    /// while a non-null input requires exact equality and rejects
    /// null-colored candidates. `symmetric_color` switches to plain
    /// equality on both sides.
    fn color_compatible(&self, input: Option<&str>, candidate: Option<&str>) -> bool {
        if self.symmetric_color {
            return input == candidate;
        }
        match input {
            None => true,
            Some(color) => candidate == Some(color),
        }
    }

    /// Resolve a SKU for an enriched material, or `None` when no candidate
    /// survives both stages
    pub async fn find_sku(
        &self,
        embedding_combined: &[f32],
        normalized_unit: &str,
        normalized_color: Option<&str>,
    ) -> Result<Option<SkuMatch>> {
        // Stage 1: vector recall
        let candidates = self
            .store
            .search(&self.collection, embedding_combined, None, self.recall_k)
            .await?;

        // Stage 2: strict unit + color compatibility, in rank order
        for candidate in candidates {
            if candidate.score < self.min_cosine {
                // Results are rank-ordered, nothing below passes either
                break;
            }

            let unit = candidate
                .payload
                .get("normalized_unit")
                .and_then(|v| v.as_str());
            if unit != Some(normalized_unit) {
                continue;
            }

            let color = candidate
                .payload
                .get("normalized_color")
                .and_then(|v| v.as_str());
            if !self.color_compatible(normalized_color, color) {
                continue;
            }

            let Some(sku) = candidate.payload.get("sku").and_then(|v| v.as_str()) else {
                continue;
            };

            debug!(sku = %sku, similarity = candidate.score, "SKU resolved");
            return Ok(Some(SkuMatch {
                sku: sku.to_string(),
                similarity: candidate.score,
            }));
        }

        Ok(None)
    }
}
