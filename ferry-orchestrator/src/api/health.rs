//! Health Check API Handler
//!
//! Liveness endpoint for monitoring; also reports how many builds and
//! deployments this process is running.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::service::ControlPlane;

/// GET /health
pub async fn health_check(State(control): State<ControlPlane>) -> Json<Value> {
    let running = control.runtime().executions.running_ids().len();
    Json(json!({ "status": "ok", "running_executions": running }))
}
