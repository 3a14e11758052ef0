//! Sliding-window rate limiter
//!
//! Keyed by `(client_id, endpoint_class)` where the client id is the API
//! key when present and the source IP otherwise. Each class carries
//! burst / per-minute / per-hour limits; the window counter is a sorted
//! set of timestamps trimmed and appended in one atomic operation against
//! the cache adapter. A cache outage fails open.

use crate::middleware::{client_id_of, endpoint_class, is_exempt};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use matforge_common::cache::keys;
use matforge_common::errors::AppError;
use std::time::Duration;
use tracing::warn;

const BURST_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Seconds until the oldest entry leaves the window
fn retry_after_secs(oldest_ms: Option<u64>, window: Duration, now_ms: u64) -> u64 {
    match oldest_ms {
        Some(oldest) => {
            let free_at = oldest + window.as_millis() as u64;
            free_at.saturating_sub(now_ms).div_ceil(1000).max(1)
        }
        None => window.as_secs(),
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.config.rate_limit.enabled || is_exempt(&path) {
        return next.run(request).await;
    }

    let class = endpoint_class(&path);
    let limits = state.config.rate_limit.for_class(class);
    let client = client_id_of(&request);
    let now_ms = chrono::Utc::now().timestamp_millis() as u64;

    let checks: [(&str, Duration, u32); 3] = [
        ("1", BURST_WINDOW, limits.burst),
        ("60", MINUTE_WINDOW, limits.per_minute),
        ("3600", HOUR_WINDOW, limits.per_hour),
    ];

    for (label, window, limit) in checks {
        let key = keys::rate_limit(&client, class, label);
        match state
            .cache
            .store()
            .window_trim_and_append(&key, window, now_ms)
            .await
        {
            Ok(sample) => {
                if sample.count > limit as u64 {
                    let retry_after = retry_after_secs(sample.oldest_ms, window, now_ms);
                    warn!(
                        client = %client,
                        class,
                        window_secs = window.as_secs(),
                        count = sample.count,
                        limit,
                        "Rate limit exceeded"
                    );
                    return AppError::RateLimited {
                        endpoint_class: class.to_string(),
                        retry_after_secs: retry_after,
                    }
                    .into_response();
                }
            }
            Err(e) => {
                // A cache outage must not take the API down with it
                warn!(error = %e, "Rate limit check failed, allowing request");
            }
        }
    }

    next.run(request).await
}
