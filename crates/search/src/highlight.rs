//! Query-term highlighting
//!
//! Wraps each query term in the configured marker inside name,
//! description, and use_category. Matching is case- and diacritic-folded
//! (including ё -> е); terms shorter than two characters are skipped and
//! overlapping matches merge into one span. SKU values are never marked.

/// Minimum folded term length considered for highlighting
const MIN_TERM_LEN: usize = 2;

/// Fold one character for matching: lowercase plus diacritic removal
fn fold_char(c: char) -> char {
    let lower = c.to_lowercase().next().unwrap_or(c);
    match lower {
        'ё' => 'е',
        'á' | 'à' | 'â' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        other => other,
    }
}

fn fold(text: &str) -> Vec<char> {
    text.chars().map(fold_char).collect()
}

/// Split query text into highlightable terms
pub fn terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.chars().map(fold_char).collect::<String>())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .collect()
}

/// Find all char ranges of `term` inside folded `haystack`
fn find_ranges(haystack: &[char], term: &[char]) -> Vec<(usize, usize)> {
    if term.is_empty() || haystack.len() < term.len() {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    for start in 0..=(haystack.len() - term.len()) {
        if haystack[start..start + term.len()] == *term {
            ranges.push((start, start + term.len()));
        }
    }
    ranges
}

/// Merge overlapping or touching ranges
fn merge_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort_unstable();
    let mut merged = vec![ranges[0]];
    for (start, end) in ranges.into_iter().skip(1) {
        let last = merged.last_mut().expect("non-empty");
        if start <= last.1 {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }
    merged
}

/// Wrap every term occurrence in `text` with the given markers
pub fn highlight(text: &str, query_terms: &[String], pre: &str, post: &str) -> String {
    if text.is_empty() || query_terms.is_empty() {
        return text.to_string();
    }

    let original: Vec<char> = text.chars().collect();
    let folded = fold(text);

    let mut ranges = Vec::new();
    for term in query_terms {
        let term_chars: Vec<char> = term.chars().collect();
        if term_chars.len() < MIN_TERM_LEN {
            continue;
        }
        ranges.extend(find_ranges(&folded, &term_chars));
    }
    if ranges.is_empty() {
        return text.to_string();
    }

    let merged = merge_ranges(ranges);
    let mut out = String::with_capacity(text.len() + merged.len() * (pre.len() + post.len()));
    let mut pos = 0;
    for (start, end) in merged {
        out.extend(&original[pos..start]);
        out.push_str(pre);
        out.extend(&original[start..end]);
        out.push_str(post);
        pos = end;
    }
    out.extend(&original[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRE: &str = "‹mark›";
    const POST: &str = "‹/mark›";

    #[test]
    fn test_basic_highlight() {
        let terms = terms("кирпич");
        assert_eq!(
            highlight("Кирпич керамический", &terms, PRE, POST),
            "‹mark›Кирпич‹/mark› керамический"
        );
    }

    #[test]
    fn test_case_and_yo_folding() {
        let terms = terms("ЧЕРНЫЙ");
        assert_eq!(
            highlight("Чёрный лист", &terms, PRE, POST),
            "‹mark›Чёрный‹/mark› лист"
        );
    }

    #[test]
    fn test_short_terms_skipped() {
        let terms = terms("м 5");
        assert!(terms.is_empty());
    }

    #[test]
    fn test_overlapping_matches_merge() {
        let terms = vec!["кирпич".to_string(), "ирпи".to_string()];
        // The shorter term is inside the longer one; a single span results
        assert_eq!(
            highlight("кирпич", &terms, PRE, POST),
            "‹mark›кирпич‹/mark›"
        );
    }

    #[test]
    fn test_multiple_occurrences() {
        let terms = terms("м500");
        assert_eq!(
            highlight("Цемент М500 (м500)", &terms, PRE, POST),
            "Цемент ‹mark›М500‹/mark› (‹mark›м500‹/mark›)"
        );
    }

    #[test]
    fn test_no_match_returns_original() {
        let terms = terms("плитка");
        assert_eq!(highlight("Цемент М500", &terms, PRE, POST), "Цемент М500");
    }
}
