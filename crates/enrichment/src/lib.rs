//! MatForge Enrichment
//!
//! The AI-assisted enrichment pipeline:
//! - Material parsing (unit, coefficient, color + embeddings)
//! - RAG normalization against the colors/units reference collections
//! - Combined-embedding generation with caching
//! - Two-stage SKU lookup against the reference-materials catalog

pub mod combined;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod reference;
pub mod sku;

pub use combined::CombinedEmbeddingService;
pub use normalize::RagNormalizer;
pub use parser::{MaterialParser, ParsedMaterial};
pub use pipeline::{EnrichmentOutcome, EnrichmentPipeline};
pub use reference::{ReferenceCollection, ReferenceService};
pub use sku::{SkuMatch, SkuSearch};
