//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use std::time::Instant;

use crate::state::AppState;
use matforge_common::tunnel::TunnelState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub checks: BackendChecks,
}

#[derive(Serialize)]
pub struct BackendChecks {
    pub vector_store: CheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<CheckResult>,
    pub cache: CheckResult,
}

#[derive(Serialize)]
pub struct DatabasesResponse {
    pub vector_store: CheckResult,
    pub sql_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<CheckResult>,
    pub cache: CheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelState>,
}

async fn check<F, Fut>(probe: F) -> CheckResult
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = matforge_common::errors::Result<()>>,
{
    let start = Instant::now();
    match probe().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: matforge_common::VERSION.to_string(),
    })
}

/// GET /health/detailed
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let vector = check(|| async { state.vector.ping().await }).await;
    let cache = check(|| async { state.cache.ping().await }).await;
    let database = match &state.sql {
        Some(sql) => Some(check(|| async { sql.ping().await }).await),
        None => None,
    };

    let all_up = vector.status == "up"
        && cache.status == "up"
        && database.as_ref().map(|d| d.status == "up").unwrap_or(true);

    Json(DetailedHealthResponse {
        status: if all_up { "healthy" } else { "degraded" }.to_string(),
        version: matforge_common::VERSION.to_string(),
        checks: BackendChecks {
            vector_store: vector,
            database,
            cache,
        },
    })
}

/// GET /health/databases
pub async fn health_databases(State(state): State<AppState>) -> Json<DatabasesResponse> {
    let vector = check(|| async { state.vector.ping().await }).await;
    let cache = check(|| async { state.cache.ping().await }).await;
    let database = match &state.sql {
        Some(sql) => Some(check(|| async { sql.ping().await }).await),
        None => None,
    };

    Json(DatabasesResponse {
        vector_store: vector,
        sql_available: state.sql.is_some(),
        database,
        cache,
        tunnel: state.tunnel_state.as_ref().map(|rx| *rx.borrow()),
    })
}
