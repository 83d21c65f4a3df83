//! Build API Handlers
//!
//! HTTP endpoints for running pipelines and inspecting builds.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ferry_core::domain::build::Build;
use ferry_core::domain::deployment::Deployment;
use ferry_core::domain::log::LogEntry;
use ferry_core::dto::build::RunPipeline;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::ControlPlane;

/// POST /pipeline/{id}/run
/// Start a manual build; answers as soon as the build is accepted
pub async fn run_pipeline(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
    Json(req): Json<RunPipeline>,
) -> ApiResult<(StatusCode, Json<Build>)> {
    tracing::info!("Running pipeline {} at {}", id, req.git_ref);

    let build = control.run_pipeline(id, &req.git_ref).await?;
    Ok((StatusCode::ACCEPTED, Json(build)))
}

/// GET /pipeline/{id}/builds
/// List builds of a pipeline, newest first
pub async fn list_builds(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Build>>> {
    tracing::debug!("Listing builds of pipeline: {}", id);

    let builds = control.list_builds(id).await?;
    Ok(Json(builds))
}

/// GET /build/{id}
/// Get build details by ID
pub async fn get_build(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Build>> {
    tracing::debug!("Getting build: {}", id);

    let build = control.get_build(id).await?;
    Ok(Json(build))
}

/// GET /build/{id}/logs
/// Get the execution log of a build
pub async fn get_build_logs(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = control.get_build_logs(id).await?;
    Ok(Json(logs))
}

/// POST /build/{id}/cancel
/// Cancel a build that has not finished yet
pub async fn cancel_build(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Build>> {
    tracing::info!("Cancelling build: {}", id);

    let build = control.cancel_build(id).await?;
    Ok(Json(build))
}

/// GET /build/{id}/deployments
/// List deployments of a build
pub async fn list_deployments(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Deployment>>> {
    let deployments = control.list_deployments(id).await?;
    Ok(Json(deployments))
}
