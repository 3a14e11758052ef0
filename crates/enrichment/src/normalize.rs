//! RAG normalization (pipeline stage B)
//!
//! Maps free-form unit and color strings to canonical reference entries
//! through three tiers: exact alias match, vector nearest-neighbor, then
//! Levenshtein fuzzy matching. Unit and color lookups are independent and
//! run in parallel from the pipeline.

use crate::reference::ReferenceService;
use matforge_common::config::EnrichmentConfig;
use matforge_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::debug;

/// Three-tier normalizer over the reference collections
pub struct RagNormalizer {
    reference: Arc<ReferenceService>,
    config: EnrichmentConfig,
}

impl RagNormalizer {
    pub fn new(reference: Arc<ReferenceService>, config: EnrichmentConfig) -> Self {
        Self { reference, config }
    }

    /// Normalize a parsed unit. Fails with `UnitUnknown` when no tier
    /// produces a confident match.
    pub fn normalize_unit(&self, parsed_unit: &str, embedding_unit: &[f32]) -> Result<String> {
        // Tier 1: exact alias
        if let Some(canonical) = self.reference.units.lookup_exact(parsed_unit) {
            return Ok(canonical);
        }

        // Tier 2: vector nearest neighbor
        if let Some((canonical, similarity)) =
            self.reference.units.lookup_nearest(embedding_unit, 1).pop()
        {
            if similarity >= self.config.unit_vector_threshold {
                debug!(unit = %parsed_unit, canonical = %canonical, similarity, "Unit matched by vector");
                return Ok(canonical);
            }
        }

        // Tier 3: fuzzy over canonicals
        if let Some((canonical, similarity)) =
            self.reference.units.lookup_fuzzy(parsed_unit, 1).pop()
        {
            if similarity >= self.config.unit_fuzzy_threshold as f64 {
                debug!(unit = %parsed_unit, canonical = %canonical, similarity, "Unit matched by fuzzy");
                return Ok(canonical);
            }
        }

        Err(AppError::UnitUnknown {
            raw: parsed_unit.to_string(),
        })
    }

    /// Normalize an optional color. `None` input yields `None` without
    /// touching the reference store.
    pub fn normalize_color(
        &self,
        color: Option<&str>,
        embedding_color: Option<&[f32]>,
    ) -> Result<Option<String>> {
        let Some(color) = color else {
            return Ok(None);
        };

        if let Some(canonical) = self.reference.colors.lookup_exact(color) {
            return Ok(Some(canonical));
        }

        if let Some(embedding) = embedding_color {
            if let Some((canonical, similarity)) =
                self.reference.colors.lookup_nearest(embedding, 1).pop()
            {
                if similarity >= self.config.color_vector_threshold {
                    debug!(color = %color, canonical = %canonical, similarity, "Color matched by vector");
                    return Ok(Some(canonical));
                }
            }
        }

        if let Some((canonical, similarity)) = self.reference.colors.lookup_fuzzy(color, 1).pop() {
            if similarity >= self.config.color_fuzzy_threshold as f64 {
                debug!(color = %color, canonical = %canonical, similarity, "Color matched by fuzzy");
                return Ok(Some(canonical));
            }
        }

        Err(AppError::ColorUnknown {
            raw: color.to_string(),
        })
    }
}
