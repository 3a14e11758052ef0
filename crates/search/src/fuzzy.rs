//! Fuzzy scoring
//!
//! Per-field similarity combines normalized Levenshtein distance with the
//! longest-common-subsequence ratio; the field score is their max. The
//! record score is the weighted average over the fields that are present.

use matforge_common::model::Material;

/// Field weights shared with SQL-mode scoring
pub const WEIGHT_NAME: f64 = 0.4;
pub const WEIGHT_DESCRIPTION: f64 = 0.3;
pub const WEIGHT_CATEGORY: f64 = 0.2;
pub const WEIGHT_SKU: f64 = 0.1;

fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Longest-common-subsequence length over chars
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// LCS length divided by the longer input's length
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let longest = a_chars.len().max(b_chars.len());
    if longest == 0 {
        return 0.0;
    }
    lcs_len(&a_chars, &b_chars) as f64 / longest as f64
}

/// Similarity of one field against the query text
pub fn field_score(field: &str, query: &str) -> f64 {
    let field = fold(field);
    let query = fold(query);
    if field.is_empty() || query.is_empty() {
        return 0.0;
    }
    let levenshtein = strsim::normalized_levenshtein(&field, &query);
    let lcs = lcs_ratio(&field, &query);
    levenshtein.max(lcs)
}

/// Weighted record score over the present fields
pub fn record_score(material: &Material, query: &str) -> f32 {
    let mut weighted = 0.0f64;
    let mut weight_sum = 0.0f64;

    weighted += WEIGHT_NAME * field_score(&material.name, query);
    weight_sum += WEIGHT_NAME;

    if let Some(description) = &material.description {
        weighted += WEIGHT_DESCRIPTION * field_score(description, query);
        weight_sum += WEIGHT_DESCRIPTION;
    }
    if let Some(category) = &material.use_category {
        weighted += WEIGHT_CATEGORY * field_score(category, query);
        weight_sum += WEIGHT_CATEGORY;
    }
    if let Some(sku) = &material.sku {
        weighted += WEIGHT_SKU * field_score(sku, query);
        weight_sum += WEIGHT_SKU;
    }

    if weight_sum == 0.0 {
        return 0.0;
    }
    (weighted / weight_sum) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcs_ratio() {
        assert!((lcs_ratio("abc", "abc") - 1.0).abs() < 1e-9);
        assert!((lcs_ratio("abc", "axc") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(lcs_ratio("", "abc"), 0.0);
    }

    #[test]
    fn test_misspelled_query_scores_high() {
        let material = Material::new("m-1", "Цемент М500", "кг");
        let score = record_score(&material, "цимент м500");
        assert!(score >= 0.8, "score was {}", score);
    }

    #[test]
    fn test_unrelated_query_scores_low() {
        let material = Material::new("m-1", "Цемент М500", "кг");
        let score = record_score(&material, "плитка керамическая");
        assert!(score < 0.6, "score was {}", score);
    }

    #[test]
    fn test_absent_fields_do_not_dilute() {
        // Name-only material: the record score equals the name score
        let material = Material::new("m-1", "Кирпич", "шт");
        let name_only = record_score(&material, "кирпич");
        assert!((name_only - 1.0).abs() < 1e-6);

        let mut with_description = Material::new("m-2", "Кирпич", "шт");
        with_description.description = Some("строительный".to_string());
        let diluted = record_score(&with_description, "кирпич");
        assert!(diluted < name_only);
    }

    #[test]
    fn test_field_score_is_case_insensitive() {
        assert!((field_score("КИРПИЧ", "кирпич") - 1.0).abs() < 1e-9);
    }
}
