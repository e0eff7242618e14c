//! API Router configuration

use super::auth;
use super::handlers;
use super::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let read_routes = Router::new()
        .route("/runs", get(handlers::list_runs))
        .route("/runs/:id", get(handlers::get_run))
        .route("/runs/:id/receipts", get(handlers::list_receipts))
        .route("/runs/:id/ops-tier", get(handlers::get_ops_tier))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_read,
        ));

    let gate_routes = Router::new()
        .route("/runs/:id/gates/:gate", post(handlers::decide_gate))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_gate,
        ));

    let go_routes = Router::new()
        .route("/runs/:id/go", post(handlers::go))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_go));

    let api_routes = Router::new()
        // Liveness, unauthenticated
        .route("/health", get(handlers::health_check))
        .merge(read_routes)
        .merge(gate_routes)
        .merge(go_routes);

    // Build router with middleware
    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rest::auth::{GATE_TOKEN_HEADER, GO_TOKEN_HEADER, READ_TOKEN_HEADER};
    use crate::config::AuthConfig;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use gantry_engine::{Orchestrator, PipelineConfig, RetryPolicy};
    use gantry_state::InMemoryStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(auth: AuthConfig) -> AppState {
        let orchestrator =
            Orchestrator::from_config(PipelineConfig::default(), Arc::new(InMemoryStore::new()))
                .unwrap();
        AppState::new(Arc::new(orchestrator), RetryPolicy::none(), auth)
    }

    fn all_tokens() -> AuthConfig {
        AuthConfig {
            read_token: Some("read-secret".into()),
            gate_token: Some("gate-secret".into()),
            go_token: Some("go-secret".into()),
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone(), false)
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_with(uri: &str, header: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header, token)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, header: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header, token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let state = state(AuthConfig::default());
        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn read_requires_its_own_token() {
        let state = state(all_tokens());
        state.orchestrator.init_run("audio").await.unwrap();

        let (status, body) = send(&state, get_with("/api/v1/runs", READ_TOKEN_HEADER, "read-secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, _) = send(&state, get_with("/api/v1/runs", READ_TOKEN_HEADER, "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // A gate token does not grant read
        let (status, _) = send(&state, get_with("/api/v1/runs", GATE_TOKEN_HEADER, "gate-secret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unset_token_disables_capability() {
        let state = state(AuthConfig {
            read_token: Some("read-secret".into()),
            ..Default::default()
        });
        let request = post_json(
            "/api/v1/runs/audio-20260101/go",
            GO_TOKEN_HEADER,
            "anything",
            Value::Null,
        );
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn summary_of_missing_run_is_404() {
        let state = state(all_tokens());
        let (status, body) = send(
            &state,
            get_with("/api/v1/runs/ghost-20260101", READ_TOKEN_HEADER, "read-secret"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn gate_decision_before_gate_is_refused() {
        let state = state(all_tokens());
        let run = state.orchestrator.init_run("audio").await.unwrap();
        let uri = format!("/api/v1/runs/{}/gates/gate1", run.run_id);

        let request = post_json(
            &uri,
            GATE_TOKEN_HEADER,
            "gate-secret",
            json!({ "decision": "approve", "reviewer": "editor" }),
        );
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");

        let bad_gate = post_json(
            &format!("/api/v1/runs/{}/gates/gate9", run.run_id),
            GATE_TOKEN_HEADER,
            "gate-secret",
            json!({ "decision": "approve", "reviewer": "editor" }),
        );
        let (status, _) = send(&state, bad_gate).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn go_is_refused_when_paused() {
        let state = state(all_tokens());
        let run = state.orchestrator.init_run("audio").await.unwrap();
        state
            .orchestrator
            .adjust_ops(&run.run_id, Some(0), false)
            .await
            .unwrap();

        let request = post_json(
            &format!("/api/v1/runs/{}/go", run.run_id),
            GO_TOKEN_HEADER,
            "go-secret",
            Value::Null,
        );
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::LOCKED);
        assert_eq!(body["code"], "TIER_BLOCKED");

        let receipts = state.orchestrator.history(&run.run_id).await.unwrap();
        assert!(receipts.is_empty());
    }
}
