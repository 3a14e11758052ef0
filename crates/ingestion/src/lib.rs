//! MatForge Ingestion
//!
//! Batch enrichment with persisted job tracking, the bounded worker pool,
//! and supplier price-list (CSV/XLSX) ingestion.

pub mod jobs;
pub mod pricelist;
pub mod worker;

pub use jobs::{JobTracker, ThroughputEstimator};
pub use pricelist::{IngestReport, PriceListService, RejectedRow};
pub use worker::{AcceptResponse, BatchProcessor, EnrichInput, ProcessRequest};
