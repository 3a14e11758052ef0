//! Advanced query types
//!
//! The request surface of the hybrid search engine: mode, filters, sort
//! keys, pagination, and per-request options, plus the canonical query
//! hash used for caching and analytics.

use chrono::{DateTime, Utc};
use matforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Sql,
    Fuzzy,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Sql => "sql",
            SearchMode::Fuzzy => "fuzzy",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Non-text constraints; empty collections mean "no constraint"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub units: Vec<String>,

    /// Glob with `*` (any run) and `?` (any single char)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_pattern: Option<String>,

    /// Half-open `[from, to)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_to: Option<DateTime<Utc>>,

    /// Per-query override of the mode's default threshold, in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
}

/// Sortable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Relevance,
    Name,
    CreatedAt,
    UpdatedAt,
    UseCategory,
    Unit,
    Sku,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ordered sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }
}

/// Page-based or cursor-based pagination; mutually exclusive per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    Page { page: usize, size: usize },
    Cursor { cursor: String, size: usize },
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::Page { page: 1, size: 20 }
    }
}

/// Per-request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default)]
    pub highlight: bool,

    #[serde(default)]
    pub include_total: bool,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    500
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            highlight: false,
            include_total: false,
            max_results: default_max_results(),
        }
    }
}

/// The full search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    pub mode: SearchMode,

    #[serde(default)]
    pub filters: SearchFilters,

    #[serde(default)]
    pub sort: Vec<SortKey>,

    #[serde(default)]
    pub pagination: Pagination,

    #[serde(default)]
    pub options: SearchOptions,
}

impl AdvancedQuery {
    /// Structural validation shared by every mode
    pub fn validate(&self) -> Result<()> {
        if self.mode == SearchMode::Vector && self.normalized_text().is_empty() {
            return Err(AppError::Validation {
                message: "Vector mode requires non-empty query text".to_string(),
                field: Some("text".to_string()),
            });
        }

        match &self.pagination {
            Pagination::Page { page, size } => {
                if *page < 1 {
                    return Err(AppError::Validation {
                        message: "page must be >= 1".to_string(),
                        field: Some("pagination.page".to_string()),
                    });
                }
                if *size > 100 {
                    return Err(AppError::Validation {
                        message: "size must be <= 100".to_string(),
                        field: Some("pagination.size".to_string()),
                    });
                }
            }
            Pagination::Cursor { size, .. } => {
                if *size > 100 {
                    return Err(AppError::Validation {
                        message: "size must be <= 100".to_string(),
                        field: Some("pagination.size".to_string()),
                    });
                }
            }
        }

        if let Some(threshold) = self.filters.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Validation {
                    message: "similarity_threshold must be in [0, 1]".to_string(),
                    field: Some("filters.similarity_threshold".to_string()),
                });
            }
        }

        if self.options.max_results > 500 {
            return Err(AppError::Validation {
                message: "max_results must be <= 500".to_string(),
                field: Some("options.max_results".to_string()),
            });
        }

        Ok(())
    }

    /// Query text folded for hashing and matching
    pub fn normalized_text(&self) -> String {
        self.text
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Requested page size
    pub fn page_size(&self) -> usize {
        match &self.pagination {
            Pagination::Page { size, .. } => *size,
            Pagination::Cursor { size, .. } => *size,
        }
    }

    /// SHA1(mode || normalized_text || filters), first 16 hex chars.
    /// Canonical across filter serialization because the struct field
    /// order is fixed.
    pub fn query_hash(&self) -> String {
        let filters = serde_json::to_string(&self.filters).unwrap_or_default();
        let input = format!("{}{}{}", self.mode.as_str(), self.normalized_text(), filters);
        let digest = Sha1::digest(input.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Hash over the entire canonical query, used as the search cache key
    pub fn cache_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        hex::encode(Sha1::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(mode: SearchMode, text: &str) -> AdvancedQuery {
        AdvancedQuery {
            text: Some(text.to_string()),
            mode,
            filters: SearchFilters::default(),
            sort: Vec::new(),
            pagination: Pagination::default(),
            options: SearchOptions::default(),
        }
    }

    #[test]
    fn test_vector_mode_requires_text() {
        let q = query(SearchMode::Vector, "   ");
        assert!(matches!(
            q.validate().unwrap_err(),
            AppError::Validation { .. }
        ));

        let q = query(SearchMode::Sql, "");
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_size_bounds() {
        let mut q = query(SearchMode::Fuzzy, "кирпич");
        q.pagination = Pagination::Page { page: 1, size: 101 };
        assert!(q.validate().is_err());

        // limit=0 is allowed: empty page, total still reported
        q.pagination = Pagination::Page { page: 1, size: 0 };
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_query_hash_is_stable_and_mode_sensitive() {
        let a = query(SearchMode::Hybrid, "Кирпич  Белый");
        let b = query(SearchMode::Hybrid, "кирпич белый");
        let c = query(SearchMode::Vector, "кирпич белый");

        // Case and whitespace fold into the same hash
        assert_eq!(a.query_hash(), b.query_hash());
        assert_ne!(a.query_hash(), c.query_hash());
        assert_eq!(a.query_hash().len(), 16);
    }

    #[test]
    fn test_filters_change_hash() {
        let a = query(SearchMode::Sql, "кирпич");
        let mut b = a.clone();
        b.filters.units = vec!["шт".to_string()];
        assert_ne!(a.query_hash(), b.query_hash());
    }
}
