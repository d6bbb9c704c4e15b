use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::{DecideError, Pipeline};

use super::request::DecideRequest;
use super::response::{ErrorResponse, HealthResponse, ReadyResponse};

/// Shared application state.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,

    /// Global recorder handle, when one is installed
    pub prometheus: Option<PrometheusHandle>,

    /// Application start time
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/decide", post(handle_decide))
        .route("/v1/metrics", get(handle_metrics_snapshot))
        .route("/v1/metrics/reset", post(handle_metrics_reset))
        .route("/v1/cache", delete(handle_cache_clear))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle decision requests.
async fn handle_decide(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DecideRequest>,
) -> Response {
    match state.pipeline.decide(req.input.as_bytes(), req.context()).await {
        Ok(decision) => (StatusCode::OK, Json(decision)).into_response(),
        Err(DecideError::Validation(e)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(e.to_string())),
        )
            .into_response(),
        Err(e @ DecideError::Audit(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error(e.to_string())),
        )
            .into_response(),
    }
}

/// Metrics snapshot as JSON.
async fn handle_metrics_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.metrics_snapshot())
}

async fn handle_metrics_reset(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.reset_metrics();
    info!("Metrics reset");
    StatusCode::NO_CONTENT
}

async fn handle_cache_clear(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.cache().clear();
    info!("Decision cache cleared");
    StatusCode::NO_CONTENT
}

/// Health check endpoint.
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        rules_version: state.pipeline.rule_set().version.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check endpoint.
async fn handle_ready(State(state): State<Arc<AppState>>) -> Response {
    let ruleset = state.pipeline.rule_set();

    if ruleset.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("No rules loaded", "NOT_READY")),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            rules_version: ruleset.version.clone(),
            rules: ruleset.len(),
            mock_mode: state.pipeline.orchestrator().is_mock_mode(),
        }),
    )
        .into_response()
}

/// Metrics endpoint (Prometheus format).
async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = state.pipeline.metrics_snapshot().to_prometheus();
    if let Some(handle) = &state.prometheus {
        body.push_str(&handle.render());
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedBackend;
    use crate::backend::{BackendOrchestrator, RetryPolicy};
    use crate::policy::loader::{parse_document, RuleFormat};
    use crate::policy::static_rules;
    use crate::rules::RuleSet;
    use crate::sanitizer::Sanitizer;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const RULES: &str = r#"
version: "1.0"
rules:
  - id: CMD_001
    name: Destructive shell command
    pattern: 'rm\s+-rf\s+\S+'
    severity: CRITICAL
"#;

    fn test_app_state(ruleset: RuleSet) -> Arc<AppState> {
        let backend = Arc::new(ScriptedBackend::answering("primary", "analysis"));
        let pipeline = Pipeline::new(static_rules(ruleset))
            .with_sanitizer(Sanitizer::new(64))
            .with_orchestrator(
                BackendOrchestrator::new(Some(backend)).with_retry(RetryPolicy::no_retry()),
            );

        Arc::new(AppState {
            pipeline: Arc::new(pipeline),
            prometheus: None,
            start_time: Instant::now(),
            version: "0.1.0-test".to_string(),
        })
    }

    fn loaded_rules() -> RuleSet {
        RuleSet::compile(&parse_document(RULES, RuleFormat::Yaml).unwrap()).unwrap()
    }

    fn decide_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/decide")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_app_state(loaded_rules()));

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["rules_version"], "1.0");
    }

    #[tokio::test]
    async fn test_decide_blocks() {
        let app = create_router(test_app_state(loaded_rules()));

        let response = app
            .oneshot(decide_request(r#"{"input": "rm -rf /var/log/*"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["blocked"], true);
        assert_eq!(json["ruleId"], "CMD_001");
        assert_eq!(json["severity"], "CRITICAL");
        assert_eq!(json["context"], "SOC Analysis");
    }

    #[tokio::test]
    async fn test_decide_allows() {
        let app = create_router(test_app_state(loaded_rules()));

        let response = app
            .oneshot(decide_request(r#"{"input": "what is DNS tunneling", "context": "Training"}"#))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["blocked"], false);
        assert_eq!(json["output"], "analysis");
        assert_eq!(json["degraded"], false);
    }

    #[tokio::test]
    async fn test_decide_rejects_oversized_input() {
        let state = test_app_state(loaded_rules());
        let app = create_router(state.clone());
        let body = serde_json::json!({ "input": "a".repeat(65) }).to_string();

        let response = app.oneshot(decide_request(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
        assert_eq!(state.pipeline.metrics_snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_and_reset() {
        let state = test_app_state(loaded_rules());
        state.pipeline.decide("rm -rf /tmp", "SOC").await.unwrap();

        let app = create_router(state.clone());
        let request = Request::builder().uri("/v1/metrics").body(Body::empty()).unwrap();
        let json = body_json(app.clone().oneshot(request).await.unwrap()).await;

        assert_eq!(json["totalRequests"], 1);
        assert_eq!(json["blockRate"], 1.0);
        assert_eq!(json["ruleTriggers"]["CMD_001"], 1);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/metrics/reset")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.pipeline.metrics_snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let state = test_app_state(loaded_rules());
        state.pipeline.decide("hello", "SOC").await.unwrap();
        assert_eq!(state.pipeline.cache().len(), 1);

        let request = Request::builder()
            .method("DELETE")
            .uri("/v1/cache")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_prometheus_text() {
        let state = test_app_state(loaded_rules());
        state.pipeline.decide("hello", "SOC").await.unwrap();

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("promptgate_requests_total 1"));
    }

    #[tokio::test]
    async fn test_ready_requires_rules() {
        let request = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let empty = create_router(test_app_state(RuleSet::empty()));
        assert_eq!(
            empty.oneshot(request()).await.unwrap().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let loaded = create_router(test_app_state(loaded_rules()));
        let response = loaded.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["rules"], 1);
    }
}
