//! Router assembly
//!
//! Builds the route table and the request envelope. The envelope layers
//! run outermost-first: panic boundary, timeout, compression, body-size
//! limit, security guard, rate limiter, correlation/logging.

use crate::handlers::{enrichment, health, materials, prices, search};
use crate::middleware::{
    correlation::correlation_middleware, rate_limit::rate_limit_middleware,
    security::security_middleware,
};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use matforge_common::errors::AppError;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::{
        predicate::{NotForContentType, Predicate, SizeAbove},
        CompressionLayer,
    },
    map_response_body::MapResponseBodyLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Responses smaller than this skip compression
const MIN_COMPRESS_BYTES: u16 = 2048;

/// The panic boundary converts any panic into a typed 500
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic");
    tracing::error!(detail, "Handler panicked");
    AppError::Internal {
        message: "Internal server error".to_string(),
    }
    .into_response()
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        // Health endpoints (envelope-exempt)
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::health_detailed))
        .route("/health/databases", get(health::health_databases))
        // Search
        .route("/search/advanced", post(search::advanced_search))
        .route("/search/suggestions", get(search::suggestions))
        .route("/search/analytics", get(search::search_analytics))
        // Materials
        .route("/materials", post(materials::create_material))
        .route("/materials/batch", post(materials::create_materials_batch))
        .route(
            "/materials/process-enhanced",
            post(enrichment::process_enhanced),
        )
        .route(
            "/materials/process-enhanced/status/{request_id}",
            get(enrichment::job_status),
        )
        .route(
            "/materials/process-enhanced/results/{request_id}",
            get(enrichment::job_results),
        )
        .route(
            "/materials/{id}",
            get(materials::get_material)
                .put(materials::update_material)
                .delete(materials::delete_material),
        )
        // Prices
        .route("/prices/process", post(prices::process_prices))
        .route("/prices/{supplier_id}/latest", get(prices::latest_prices))
        .route("/prices/{supplier_id}", delete(prices::delete_prices));

    routes
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::new(state.config.request_timeout()))
                .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CompressionLayer::new().compress_when(
                        SizeAbove::new(MIN_COMPRESS_BYTES).and(NotForContentType::IMAGES),
                    ),
                )
                .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    security_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    correlation_middleware,
                )),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_state;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use matforge_common::config::{AppConfig, EndpointLimits};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_router(tune: impl FnOnce(&mut AppConfig)) -> Router {
        let mut config = AppConfig::default();
        config.vector_store.provider = "memory".to_string();
        config.redis.provider = "memory".to_string();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimension = 64;
        tune(&mut config);

        let runtime = build_state(config).await.expect("state builds offline");
        create_router(runtime.state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_health_databases_reports_sql_unavailable() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(Request::get("/health/databases").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["sql_available"], false);
        assert_eq!(body["vector_store"]["status"], "up");
    }

    #[tokio::test]
    async fn test_create_and_get_material() {
        let router = test_router(|_| {}).await;

        let created = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/materials",
                json!({"id": "m-1", "name": "Цемент М500", "unit": "кг"}),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let fetched = router
            .oneshot(Request::get("/materials/m-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let body = body_json(fetched).await;
        assert_eq!(body["name"], "Цемент М500");
    }

    #[tokio::test]
    async fn test_get_missing_material_is_404() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(Request::get("/materials/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fuzzy_search_end_to_end() {
        let router = test_router(|_| {}).await;

        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/materials",
                json!({"id": "m-1", "name": "Цемент М500", "unit": "кг"}),
            ))
            .await
            .unwrap();

        let response = router
            .oneshot(json_request(
                "POST",
                "/search/advanced",
                json!({"text": "цимент м500", "mode": "fuzzy"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"][0]["id"], "m-1");
        assert!(body["items"][0]["score"].as_f64().unwrap() >= 0.8);
    }

    #[tokio::test]
    async fn test_vector_search_empty_text_is_validation_error() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(json_request(
                "POST",
                "/search/advanced",
                json!({"mode": "vector"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_retry_after() {
        let router = test_router(|config| {
            config.rate_limit.limits.insert(
                "search".to_string(),
                EndpointLimits {
                    per_minute: 3,
                    per_hour: 1000,
                    burst: 100,
                },
            );
        })
        .await;

        let query = json!({"text": "кирпич", "mode": "fuzzy"});
        for _ in 0..3 {
            let ok = router
                .clone()
                .oneshot(json_request("POST", "/search/advanced", query.clone()))
                .await
                .unwrap();
            assert_eq!(ok.status(), StatusCode::OK);
        }

        let limited = router
            .oneshot(json_request("POST", "/search/advanced", query))
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = limited
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .expect("Retry-After header present");
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_suspicious_body_rejected() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(json_request(
                "POST",
                "/materials",
                json!({"name": "<script>alert(1)</script>", "unit": "pcs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cyrillic_body_not_rejected() {
        let router = test_router(|_| {}).await;
        // Keyword fragment inside a mostly-Cyrillic name must pass
        let response = router
            .oneshot(json_request(
                "POST",
                "/materials",
                json!({"name": "Цемент UNION SELECT особой прочности", "unit": "кг"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_enrichment_accept_then_status_and_results() {
        let router = test_router(|_| {}).await;

        let accepted = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/materials/process-enhanced",
                json!({"materials": [
                    {"id": "m-1", "name": "Цемент М500", "unit": "кг"},
                    {"id": "m-2", "name": "Кирпич керамический", "unit": "шт"}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        let accept_body = body_json(accepted).await;
        let request_id = accept_body["request_id"].as_str().unwrap().to_string();
        assert_eq!(accept_body["total"], 2);
        assert_eq!(accept_body["ephemeral"], true);

        // Poll until the worker pool finishes both items
        let mut done = false;
        for _ in 0..200 {
            let status = router
                .clone()
                .oneshot(
                    Request::get(format!(
                        "/materials/process-enhanced/status/{request_id}"
                    ))
                    .body(Body::empty())
                    .unwrap(),
                )
                .await
                .unwrap();
            let body = body_json(status).await;
            let pending = body["pending"].as_u64().unwrap_or(0);
            let processing = body["processing"].as_u64().unwrap_or(0);
            if pending == 0 && processing == 0 {
                assert_eq!(body["completed"], 2);
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(done, "batch never completed");

        let results = router
            .oneshot(
                Request::get(format!(
                    "/materials/process-enhanced/results/{request_id}"
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(results.status(), StatusCode::OK);
        let body = body_json(results).await;
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["results"][0]["status"], "completed");
    }

    #[tokio::test]
    async fn test_unknown_job_status_is_404() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(
                Request::get("/materials/process-enhanced/status/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_price_list_upload_latest_delete() {
        let router = test_router(|_| {}).await;

        let boundary = "XMATFORGEBOUNDARY";
        let csv = "name,unit,price\nЦемент М500,кг,12.5\n";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"supplier_id\"\r\n\r\n\
             sup-1\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"list.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             {csv}\r\n\
             --{boundary}--\r\n"
        );

        let uploaded = router
            .clone()
            .oneshot(
                Request::post("/prices/process")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(uploaded.status(), StatusCode::CREATED);
        let report = body_json(uploaded).await;
        assert_eq!(report["accepted"], 1);

        let latest = router
            .clone()
            .oneshot(
                Request::get("/prices/sup-1/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(latest.status(), StatusCode::OK);
        let list = body_json(latest).await;
        assert_eq!(list["rows"][0]["raw_name"], "Цемент М500");

        let deleted = router
            .clone()
            .oneshot(
                Request::delete("/prices/sup-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = router
            .oneshot(
                Request::get("/prices/sup-1/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_correlation_header_propagated() {
        let router = test_router(|_| {}).await;
        let response = router
            .oneshot(json_request(
                "POST",
                "/search/advanced",
                json!({"text": "кирпич", "mode": "fuzzy"}),
            ))
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-correlation-id"));
    }
}
