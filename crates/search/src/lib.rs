//! MatForge Search
//!
//! The hybrid search engine and the materials repository:
//! - Four search modes (vector / sql / fuzzy / hybrid) with fusion
//! - Filtering, sorting, signed-cursor pagination, highlighting
//! - Suggestions and per-query analytics
//! - Cache-aside repository over the vector (primary) and SQL (fallback)
//!   stores

pub mod analytics;
pub mod cursor;
pub mod engine;
pub mod fusion;
pub mod fuzzy;
pub mod highlight;
pub mod payload;
pub mod query;
pub mod repository;
pub mod suggest;

pub use analytics::{AnalyticsRecorder, AnalyticsSummary};
pub use cursor::{CursorCodec, CursorPayload};
pub use engine::{SearchEngine, SearchResponse, SearchResultItem};
pub use fusion::{FusionWeights, Hit};
pub use query::{AdvancedQuery, Pagination, SearchFilters, SearchMode, SortField, SortKey};
pub use repository::{BatchOutcome, MaterialPatch, MaterialsRepository};
pub use suggest::SuggestService;
