//! Deployment API Handlers
//!
//! HTTP endpoints for deploying builds and operating deployments.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ferry_core::domain::deployment::Deployment;
use ferry_core::domain::log::LogEntry;
use ferry_core::dto::deployment::{CreateDeployment, ScaleDeployment, WorkloadLogs};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::ControlPlane;

/// Query parameters for workload logs
#[derive(Debug, Deserialize)]
pub struct WorkloadLogsQuery {
    #[serde(default = "default_tail")]
    pub tail: i64,
}

fn default_tail() -> i64 {
    100
}

/// POST /deployment
/// Deploy a successful build to an environment
pub async fn create_deployment(
    State(control): State<ControlPlane>,
    Json(req): Json<CreateDeployment>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    tracing::info!(
        "Deploying build {} to {}",
        req.build_id,
        req.environment
    );

    let deployment = control.deploy(req).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// GET /deployment/{id}
/// Get deployment details by ID
pub async fn get_deployment(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deployment>> {
    tracing::debug!("Getting deployment: {}", id);

    let deployment = control.get_deployment(id).await?;
    Ok(Json(deployment))
}

/// GET /deployment/{id}/logs
/// Get the execution log of a deployment
pub async fn get_deployment_logs(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = control.get_deployment_logs(id).await?;
    Ok(Json(logs))
}

/// POST /deployment/{id}/cancel
pub async fn cancel_deployment(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deployment>> {
    tracing::info!("Cancelling deployment: {}", id);

    let deployment = control.cancel_deployment(id).await?;
    Ok(Json(deployment))
}

/// POST /deployment/{id}/rollback
/// Roll a running deployment back to its previous revision
pub async fn rollback(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    tracing::info!("Rolling back deployment: {}", id);

    let deployment = control.rollback(id).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

/// POST /deployment/{id}/scale
pub async fn scale(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScaleDeployment>,
) -> ApiResult<Json<Deployment>> {
    tracing::info!("Scaling deployment {} to {} replicas", id, req.replicas);

    let deployment = control.scale(id, req.replicas).await?;
    Ok(Json(deployment))
}

/// POST /deployment/{id}/teardown
/// Remove the deployment's workload from the cluster
pub async fn teardown(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deployment>> {
    tracing::info!("Tearing down deployment: {}", id);

    let deployment = control.teardown(id).await?;
    Ok(Json(deployment))
}

/// GET /deployment/{id}/workload-logs?tail=N
/// Recent output of the running workload
pub async fn workload_logs(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
    Query(params): Query<WorkloadLogsQuery>,
) -> ApiResult<Json<WorkloadLogs>> {
    let logs = control.workload_logs(id, params.tail).await?;
    Ok(Json(logs))
}
