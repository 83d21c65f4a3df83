//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain; handlers are thin
//! wrappers over the [`ControlPlane`] and the pipeline service.

pub mod build;
pub mod deployment;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::ControlPlane;

/// Create the main API router with all endpoints
pub fn create_router(control: ControlPlane) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Project and pipeline administration
        .route("/project", post(pipeline::create_project))
        .route("/pipeline", post(pipeline::create_pipeline))
        .route("/pipeline/{id}", get(pipeline::get_pipeline))
        .route("/pipeline/{id}/enabled", post(pipeline::set_enabled))
        .route("/pipeline/{id}/trigger", post(pipeline::create_trigger))
        .route("/pipeline/{id}/triggers", get(pipeline::list_triggers))
        .route("/pipeline/{id}/run", post(build::run_pipeline))
        .route("/pipeline/{id}/builds", get(build::list_builds))
        // Build endpoints
        .route("/build/{id}", get(build::get_build))
        .route("/build/{id}/logs", get(build::get_build_logs))
        .route("/build/{id}/cancel", post(build::cancel_build))
        .route("/build/{id}/deployments", get(build::list_deployments))
        // Deployment endpoints
        .route("/deployment", post(deployment::create_deployment))
        .route("/deployment/{id}", get(deployment::get_deployment))
        .route("/deployment/{id}/logs", get(deployment::get_deployment_logs))
        .route("/deployment/{id}/cancel", post(deployment::cancel_deployment))
        .route("/deployment/{id}/rollback", post(deployment::rollback))
        .route("/deployment/{id}/scale", post(deployment::scale))
        .route("/deployment/{id}/teardown", post(deployment::teardown))
        .route(
            "/deployment/{id}/workload-logs",
            get(deployment::workload_logs),
        )
        // Source-control webhooks
        .route("/webhook/{provider}", post(webhook::receive))
        // Add state and middleware
        .with_state(control)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, wait_for_build};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use ferry_core::domain::build::{Build, BuildStatus};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new();
        let (status, body) = send(create_router(harness.control.clone()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["running_executions"], 0);
    }

    #[tokio::test]
    async fn test_run_pipeline_is_accepted_then_busy() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("web", "").await;
        let _gate = harness.images.hold_builds();
        let router = create_router(harness.control.clone());
        let uri = format!("/pipeline/{}/run", pipeline.id);

        let (status, body) = send(router.clone(), post_json(&uri, json!({"ref": "main"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let build: Build = serde_json::from_value(body).unwrap();
        assert_eq!(build.pipeline_id, pipeline.id);

        let (status, body) = send(router, post_json(&uri, json!({"ref": "main"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("busy"));
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let harness = Harness::new();
        let router = create_router(harness.control.clone());

        let (status, _) = send(router.clone(), get(&format!("/build/{}", uuid::Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            router.clone(),
            post_json(
                "/project",
                json!({"name": "web", "git_url": "https://x/y.git", "git_provider": "svn"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(router, post_json("/webhook/bitbucket", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_with_bad_signature_is_unauthorized() {
        let harness = Harness::with_config(|config| {
            config.github_webhook_secret = Some("s3cret".to_string());
        });
        let router = create_router(harness.control.clone());

        let request = Request::post("/webhook/github")
            .header("x-github-event", "push")
            .header("x-hub-signature-256", "sha256=00")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_build_and_logs_are_served() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("web", "").await;
        let router = create_router(harness.control.clone());

        let (_, body) = send(
            router.clone(),
            post_json(&format!("/pipeline/{}/run", pipeline.id), json!({"ref": "main"})),
        )
        .await;
        let build: Build = serde_json::from_value(body).unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;

        let (status, body) = send(router.clone(), get(&format!("/build/{}", build.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (status, body) = send(router.clone(), get(&format!("/build/{}/logs", build.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.as_array().unwrap().is_empty());

        let (status, body) = send(router, get(&format!("/pipeline/{}/builds", pipeline.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
