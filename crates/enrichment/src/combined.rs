//! Combined-embedding service (pipeline stage C)
//!
//! Produces one vector from the canonicalized triple
//! `(name, normalized_unit, normalized_color | "без_цвета")` under the
//! fixed concatenation format. Results are cached for a day and concurrent
//! misses for the same text collapse into one provider call.

use matforge_common::cache::{keys, Cache};
use matforge_common::embeddings::Embedder;
use matforge_common::errors::Result;
use matforge_common::model::EnrichedMaterial;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;

/// SHA1 hex digest used for combined/SKU cache keys
pub fn text_hash(text: &str) -> String {
    hex::encode(Sha1::digest(text.as_bytes()))
}

/// Stage C of the enrichment pipeline
pub struct CombinedEmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Cache,
    ttl: Duration,
    embed_timeout: Duration,
}

impl CombinedEmbeddingService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        cache: Cache,
        ttl: Duration,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            cache,
            ttl,
            embed_timeout,
        }
    }

    /// The canonical text and its hash for a triple
    pub fn combined_key(
        name: &str,
        normalized_unit: &str,
        normalized_color: Option<&str>,
    ) -> (String, String) {
        let text = EnrichedMaterial::combined_text(name, normalized_unit, normalized_color);
        let hash = text_hash(&text);
        (text, hash)
    }

    /// Get or generate the combined embedding for a canonical triple
    pub async fn get_or_generate(
        &self,
        name: &str,
        normalized_unit: &str,
        normalized_color: Option<&str>,
    ) -> Result<Vec<f32>> {
        let (text, hash) = Self::combined_key(name, normalized_unit, normalized_color);
        let embedder = Arc::clone(&self.embedder);

        self.cache
            .get_or_load(
                "combined",
                &keys::combined(&hash),
                self.ttl,
                self.embed_timeout,
                move || async move { embedder.embed(&text).await },
            )
            .await
    }
}
