//! Search handlers

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use matforge_common::errors::Result;
use matforge_search::analytics::{self, AnalyticsSummary};
use matforge_search::{AdvancedQuery, SearchResponse};

/// POST /search/advanced
pub async fn advanced_search(
    State(state): State<AppState>,
    Json(query): Json<AdvancedQuery>,
) -> Result<Json<SearchResponse>> {
    let response = state.repository.search(&query).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_suggest_limit")]
    pub limit: usize,
}

fn default_suggest_limit() -> usize {
    10
}

#[derive(Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<String>,
}

/// GET /search/suggestions?q=&limit=
pub async fn suggestions(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<SuggestResponse>> {
    let suggestions = state
        .engine
        .suggest_service()
        .suggest(&params.q, params.limit)
        .await?;
    Ok(Json(SuggestResponse { suggestions }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    /// YYYY-MM-DD, inclusive; defaults to seven days back
    pub from: Option<String>,
    /// YYYY-MM-DD, exclusive; defaults to tomorrow
    pub to: Option<String>,
}

/// GET /search/analytics?from=&to=
pub async fn search_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsSummary>> {
    let from = params.from.unwrap_or_else(|| {
        (Utc::now() - ChronoDuration::days(7))
            .format("%Y-%m-%d")
            .to_string()
    });
    let to = params.to.unwrap_or_else(|| {
        (Utc::now() + ChronoDuration::days(1))
            .format("%Y-%m-%d")
            .to_string()
    });

    let records =
        analytics::query_range(state.sql.as_ref(), &state.cache, &from, &to).await?;
    Ok(Json(analytics::aggregate(&records)))
}
