//! Core domain types shared by all MatForge services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder color used in the combined-embedding text when a material
/// has no normalized color
pub const NO_COLOR: &str = "без_цвета";

/// A catalog material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Opaque identifier
    pub id: String,

    /// Display name, 1..500 chars
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_category: Option<String>,

    /// Raw unit as supplied
    pub unit: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Present iff the material is indexed in the vector store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Material {
    /// Create a material with generated timestamps and no embedding
    pub fn new(id: impl Into<String>, name: impl Into<String>, unit: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            use_category: None,
            unit: unit.into(),
            sku: None,
            created_at: now,
            updated_at: now,
            embedding: None,
        }
    }

    /// The text indexed for semantic search
    pub fn embedding_text(&self) -> String {
        let mut text = self.name.clone();
        if let Some(desc) = &self.description {
            text.push(' ');
            text.push_str(desc);
        }
        if let Some(cat) = &self.use_category {
            text.push(' ');
            text.push_str(cat);
        }
        text
    }
}

/// A material after the enrichment pipeline has run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedMaterial {
    #[serde(flatten)]
    pub material: Material,

    /// Unit as extracted by the parser
    pub parsed_unit: String,

    /// Multiplier to the canonical unit, always >= 0
    pub unit_coefficient: f64,

    /// Free-form color as extracted, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Canonical color after normalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_color: Option<String>,

    /// Canonical unit after normalization
    pub normalized_unit: String,

    /// Vector over the canonicalized (name, unit, color) triple
    pub embedding_combined: Vec<f32>,
}

impl EnrichedMaterial {
    /// Fixed concatenation format for the combined embedding.
    /// Changing name, normalized unit, or normalized color requires
    /// regenerating the vector.
    pub fn combined_text(name: &str, normalized_unit: &str, normalized_color: Option<&str>) -> String {
        format!(
            "{} | unit:{} | color:{}",
            name,
            normalized_unit,
            normalized_color.unwrap_or(NO_COLOR)
        )
    }
}

/// Entry in the colors / units reference collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    /// Unique canonical form
    pub canonical_name: String,

    /// Alternative spellings; disjoint across entries
    pub aliases: Vec<String>,

    /// Regenerated whenever aliases change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// SKU catalog entry matched against enriched materials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    pub sku: String,
    pub name: String,
    pub normalized_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_color: Option<String>,
    pub embedding_combined: Vec<f32>,
}

/// One row of a supplier price list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_ref: Option<String>,
    pub raw_name: String,
    pub unit: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

/// Source file format of an ingested price list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
}

/// An immutable, supplier-scoped price list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceList {
    pub supplier_id: String,
    pub pricelist_id: String,
    pub uploaded_at: DateTime<Utc>,
    pub rows: Vec<PriceRow>,
    pub source_format: SourceFormat,
}

/// Status of a single batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

impl From<&str> for ItemStatus {
    fn from(s: &str) -> Self {
        match s {
            "processing" => ItemStatus::Processing,
            "completed" => ItemStatus::Completed,
            "failed" => ItemStatus::Failed,
            _ => ItemStatus::Pending,
        }
    }
}

/// Per-item state tracked for a processing job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub material_id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Aggregate counts for a processing job.
/// Invariant: pending + processing + completed + failed == total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn is_consistent(&self) -> bool {
        self.pending + self.processing + self.completed + self.failed == self.total
    }

    pub fn is_done(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

/// One per-query analytics record, bucketed by day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    /// Day bucket, YYYY-MM-DD
    pub day: String,
    /// SHA1(mode || normalized_text || filters)[..16]
    pub query_hash: String,
    pub mode: String,
    pub duration_ms: u64,
    pub result_count: usize,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_text_format() {
        let text = EnrichedMaterial::combined_text("Кирпич керамический", "шт", Some("красный"));
        assert_eq!(text, "Кирпич керамический | unit:шт | color:красный");

        let no_color = EnrichedMaterial::combined_text("Цемент М500", "кг", None);
        assert_eq!(no_color, "Цемент М500 | unit:кг | color:без_цвета");
    }

    #[test]
    fn test_job_counts_invariant() {
        let counts = JobCounts {
            total: 10,
            pending: 3,
            processing: 2,
            completed: 4,
            failed: 1,
        };
        assert!(counts.is_consistent());
        assert!(!counts.is_done());
    }

    #[test]
    fn test_embedding_text_concatenates_fields() {
        let mut m = Material::new("m-1", "Кирпич", "шт");
        m.description = Some("керамический".to_string());
        m.use_category = Some("стены".to_string());
        assert_eq!(m.embedding_text(), "Кирпич керамический стены");
    }
}
