//! Request envelope
//!
//! The middleware chain applied to every request, outermost first:
//! error boundary (panic catcher), compression, security (size/content
//! guard + response headers), sliding-window rate limiter, and
//! correlation/logging. Exempted paths (health, metrics, docs) skip the
//! inner stages.

pub mod correlation;
pub mod rate_limit;
pub mod security;

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Client identity: API key header wins, source IP otherwise
pub fn client_id_of(request: &Request) -> String {
    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return format!("key:{key}");
    }
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return format!("ip:{forwarded}");
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| format!("ip:{}", info.0.ip()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Paths the inner envelope stages skip
pub fn is_exempt(path: &str) -> bool {
    path == "/health"
        || path.starts_with("/health/")
        || path.starts_with("/docs")
        || path == "/metrics"
}

/// Rate-limit class of an endpoint
pub fn endpoint_class(path: &str) -> &'static str {
    if path.starts_with("/search") {
        "search"
    } else if path.starts_with("/materials/process-enhanced") {
        "enrichment"
    } else if path.starts_with("/materials") {
        "materials"
    } else if path.starts_with("/prices") {
        "prices"
    } else {
        "default"
    }
}
