//! Batch enrichment handlers (accept-then-process)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::JobItem;
use matforge_ingestion::{AcceptResponse, ProcessRequest};

/// POST /materials/process-enhanced
pub async fn process_enhanced(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<(StatusCode, Json<AcceptResponse>)> {
    let accepted = state.processor.accept(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub request_id: String,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub estimated_completion: DateTime<Utc>,
    /// True when job state lives only in the cache and will expire
    pub ephemeral: bool,
}

/// GET /materials/process-enhanced/status/{request_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    let counts = state
        .tracker
        .counts(&request_id)
        .await?
        .ok_or_else(|| AppError::JobNotFound {
            request_id: request_id.clone(),
        })?;

    let unfinished = counts.pending + counts.processing;
    Ok(Json(JobStatusResponse {
        request_id,
        total: counts.total,
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        failed: counts.failed,
        estimated_completion: state.processor.estimate_for(unfinished),
        ephemeral: !state.tracker.is_durable(),
    }))
}

#[derive(Serialize)]
pub struct JobResultsResponse {
    pub request_id: String,
    pub results: Vec<JobItem>,
    pub ephemeral: bool,
}

/// GET /materials/process-enhanced/results/{request_id}
pub async fn job_results(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<JobResultsResponse>> {
    // Distinguish "unknown job" from "job with no items yet"
    state
        .tracker
        .counts(&request_id)
        .await?
        .ok_or_else(|| AppError::JobNotFound {
            request_id: request_id.clone(),
        })?;

    let results = state.tracker.items(&request_id).await?;
    Ok(Json(JobResultsResponse {
        request_id,
        results,
        ephemeral: !state.tracker.is_durable(),
    }))
}
