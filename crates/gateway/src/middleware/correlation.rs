//! Correlation and request logging
//!
//! Generates (or adopts) the correlation id, builds the request-scoped
//! context threaded to every downstream call, and emits exactly one
//! completion log line per request. Sensitive headers are masked before
//! they can reach a log field.

use crate::middleware::{client_id_of, is_exempt};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use matforge_common::context::RequestContext;
use matforge_common::metrics::RequestMetrics;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Bodies above this size are never logged
const BODY_LOG_LIMIT: usize = 64 * 1024;

/// Headers whose values never appear in logs
pub fn mask_header(name: &str, value: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "authorization" | "x-api-key" | "cookie" | "set-cookie" => "***".to_string(),
        _ => value.to_string(),
    }
}

/// Flattened, masked header list for debug logging
fn loggable_headers(request: &Request) -> String {
    request
        .headers()
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                name,
                mask_header(name.as_str(), value.to_str().unwrap_or("<binary>"))
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Buffer and log a small textual body, handing it back untouched.
/// Bodies without a known small Content-Length are left alone.
async fn log_body(request: Request, correlation_id: &str) -> Request {
    let is_text = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json") || ct.starts_with("text/"))
        .unwrap_or(false);
    let small = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len <= BODY_LOG_LIMIT)
        .unwrap_or(false);
    if !is_text || !small {
        return request;
    }

    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, BODY_LOG_LIMIT).await {
        Ok(bytes) => {
            debug!(
                correlation_id = %correlation_id,
                body = %String::from_utf8_lossy(&bytes),
                "Request body"
            );
            Request::from_parts(parts, Body::from(bytes))
        }
        Err(_) => Request::from_parts(parts, Body::empty()),
    }
}

pub async fn correlation_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt(&path) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let client = client_id_of(&request);

    let ctx = RequestContext::with_correlation_id(
        correlation_id.clone(),
        client.clone(),
        state.config.request_timeout(),
    );
    request.extensions_mut().insert(ctx);

    info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        client_id = %client,
        "Request started"
    );

    if state.config.observability.log_bodies {
        debug!(
            correlation_id = %correlation_id,
            headers = %loggable_headers(&request),
            "Request headers"
        );
        request = log_body(request, &correlation_id).await;
    }

    let start = Instant::now();
    let tracker = RequestMetrics::start(method.as_str(), &path);
    let mut response = next.run(request).await;
    let status = response.status();
    tracker.finish(status.as_u16());

    // The single end-level line every request exits with
    info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        client_id = %client,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_headers_masked() {
        assert_eq!(mask_header("Authorization", "Bearer secret"), "***");
        assert_eq!(mask_header("X-Api-Key", "k-123"), "***");
        assert_eq!(mask_header("content-type", "application/json"), "application/json");
    }
}
