//! Material parser (pipeline stage A)
//!
//! Extracts the unit, packaging coefficient, and color from a raw material
//! record and produces the three embeddings the later stages need. The
//! parser never guesses a color: when no known color token appears in the
//! name, `color` stays `None`.

use matforge_common::embeddings::Embedder;
use matforge_common::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Color stems recognized in material names, mapped to the free-form color
/// passed on to normalization
const COLOR_STEMS: &[(&str, &str)] = &[
    ("бел", "белый"),
    ("черн", "черный"),
    ("чёрн", "черный"),
    ("красн", "красный"),
    ("сер", "серый"),
    ("син", "синий"),
    ("зелен", "зеленый"),
    ("зелён", "зеленый"),
    ("коричн", "коричневый"),
    ("беж", "бежевый"),
    ("желт", "желтый"),
    ("жёлт", "желтый"),
    ("оранж", "оранжевый"),
];

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("static regex"))
}

/// Parser output for one material
#[derive(Debug, Clone)]
pub struct ParsedMaterial {
    pub parsed_unit: String,
    /// Packaging multiplier, >= 0; 1.0 when the unit carries no quantity
    pub unit_coefficient: f64,
    pub color: Option<String>,
    pub embedding_name: Vec<f32>,
    pub embedding_unit: Vec<f32>,
    pub embedding_color: Option<Vec<f32>>,
}

/// Stage A of the enrichment pipeline
pub struct MaterialParser {
    embedder: Arc<dyn Embedder>,
    dimension: usize,
}

impl MaterialParser {
    pub fn new(embedder: Arc<dyn Embedder>, dimension: usize) -> Self {
        Self {
            embedder,
            dimension,
        }
    }

    /// Parse `(name, unit)` into unit/coefficient/color plus embeddings
    pub async fn parse(&self, name: &str, unit: &str) -> Result<ParsedMaterial> {
        let (parsed_unit, unit_coefficient) = Self::parse_unit(unit);
        let color = Self::extract_color(name);

        let mut texts = vec![name.to_string(), parsed_unit.clone()];
        if let Some(c) = &color {
            texts.push(c.clone());
        }
        let mut embeddings = self.embedder.embed_batch(&texts).await?;

        for vector in &embeddings {
            if vector.len() != self.dimension {
                return Err(AppError::EmbeddingShape {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        let embedding_color = if color.is_some() {
            embeddings.pop()
        } else {
            None
        };
        let embedding_unit = embeddings.pop().ok_or_else(|| AppError::Internal {
            message: "embed_batch returned fewer vectors than inputs".to_string(),
        })?;
        let embedding_name = embeddings.pop().ok_or_else(|| AppError::Internal {
            message: "embed_batch returned fewer vectors than inputs".to_string(),
        })?;

        debug!(
            parsed_unit = %parsed_unit,
            unit_coefficient,
            color = ?color,
            "Parsed material"
        );

        Ok(ParsedMaterial {
            parsed_unit,
            unit_coefficient,
            color,
            embedding_name,
            embedding_unit,
            embedding_color,
        })
    }

    /// Split a raw unit like "мешок 50 кг" or "упак(10шт)" into the unit
    /// token and its quantity coefficient
    fn parse_unit(raw: &str) -> (String, f64) {
        let cleaned = raw.trim().to_lowercase();
        if cleaned.is_empty() {
            return (cleaned, 1.0);
        }

        let coefficient = number_re()
            .find(&cleaned)
            .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
            .filter(|c| *c >= 0.0)
            .unwrap_or(1.0);

        // The unit token is what remains after stripping digits and
        // punctuation; keep the last word so "мешок 50 кг" yields "кг"
        let stripped: String = cleaned
            .chars()
            .map(|c| {
                if c.is_numeric() || matches!(c, '(' | ')' | ',' | ';') {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        let unit_token = stripped
            .split_whitespace()
            .last()
            .unwrap_or(&cleaned)
            .to_string();

        (unit_token, coefficient)
    }

    /// Find a known color token in the name; exact stem match at word
    /// start only, never a guess
    fn extract_color(name: &str) -> Option<String> {
        let lowered = name.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphabetic()) {
            if word.len() < 3 {
                continue;
            }
            for (stem, canonical) in COLOR_STEMS {
                if word.starts_with(stem) {
                    return Some((*canonical).to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::embeddings::MockEmbedder;

    fn parser() -> MaterialParser {
        MaterialParser::new(Arc::new(MockEmbedder::new(64)), 64)
    }

    #[test]
    fn test_parse_unit_with_quantity() {
        assert_eq!(MaterialParser::parse_unit("мешок 50 кг"), ("кг".to_string(), 50.0));
        assert_eq!(MaterialParser::parse_unit("упак(10шт)"), ("шт".to_string(), 10.0));
        assert_eq!(MaterialParser::parse_unit("шт"), ("шт".to_string(), 1.0));
        assert_eq!(MaterialParser::parse_unit("2,5 л"), ("л".to_string(), 2.5));
    }

    #[test]
    fn test_extract_color() {
        assert_eq!(
            MaterialParser::extract_color("Кирпич керамический белый"),
            Some("белый".to_string())
        );
        assert_eq!(
            MaterialParser::extract_color("Краска серая матовая"),
            Some("серый".to_string())
        );
        // No color token present: the parser must not guess
        assert_eq!(MaterialParser::extract_color("Цемент М500"), None);
    }

    #[tokio::test]
    async fn test_parse_produces_three_embeddings() {
        let parsed = parser()
            .parse("Кирпич керамический красный", "шт")
            .await
            .unwrap();
        assert_eq!(parsed.embedding_name.len(), 64);
        assert_eq!(parsed.embedding_unit.len(), 64);
        assert_eq!(parsed.embedding_color.as_ref().map(Vec::len), Some(64));
        assert_eq!(parsed.color.as_deref(), Some("красный"));
        assert_eq!(parsed.parsed_unit, "шт");
    }

    #[tokio::test]
    async fn test_no_color_embedding_when_no_color() {
        let parsed = parser().parse("Цемент М500", "мешок 50 кг").await.unwrap();
        assert!(parsed.color.is_none());
        assert!(parsed.embedding_color.is_none());
        assert_eq!(parsed.parsed_unit, "кг");
        assert!((parsed.unit_coefficient - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_embedding_shape() {
        let parser = MaterialParser::new(Arc::new(MockEmbedder::new(32)), 64);
        let err = parser.parse("Цемент", "кг").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingShape { expected: 64, actual: 32 }));
    }
}
