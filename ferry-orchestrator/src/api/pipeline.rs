//! Pipeline API Handlers
//!
//! HTTP endpoints for project, pipeline and trigger administration.

use axum::{
    Json,
    extract::{Path, State},
};
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::Project;
use ferry_core::domain::trigger::Trigger;
use ferry_core::dto::pipeline::{CreatePipeline, CreateProject, CreateTrigger, SetPipelineEnabled};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{ControlPlane, pipeline_service};

/// POST /project
/// Register a source repository
pub async fn create_project(
    State(control): State<ControlPlane>,
    Json(req): Json<CreateProject>,
) -> ApiResult<Json<Project>> {
    tracing::info!("Creating project: {}", req.name);

    let project = pipeline_service::create_project(control.runtime().store.as_ref(), req).await?;
    Ok(Json(project))
}

/// POST /pipeline
/// Create a new pipeline
pub async fn create_pipeline(
    State(control): State<ControlPlane>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = pipeline_service::create_pipeline(control.runtime().store.as_ref(), req).await?;
    Ok(Json(pipeline))
}

/// GET /pipeline/{id}
/// Get pipeline by ID
pub async fn get_pipeline(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = pipeline_service::get_pipeline(control.runtime().store.as_ref(), id).await?;
    Ok(Json(pipeline))
}

/// POST /pipeline/{id}/enabled
/// Enable or disable a pipeline
pub async fn set_enabled(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetPipelineEnabled>,
) -> ApiResult<Json<Pipeline>> {
    let pipeline =
        pipeline_service::set_enabled(control.runtime().store.as_ref(), id, req.enabled).await?;
    Ok(Json(pipeline))
}

/// POST /pipeline/{id}/trigger
/// Add a trigger to a pipeline
pub async fn create_trigger(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateTrigger>,
) -> ApiResult<Json<Trigger>> {
    tracing::info!("Adding {} trigger to pipeline {}", req.kind.as_str(), id);

    let trigger =
        pipeline_service::create_trigger(control.runtime().store.as_ref(), id, req).await?;
    Ok(Json(trigger))
}

/// GET /pipeline/{id}/triggers
/// List a pipeline's triggers
pub async fn list_triggers(
    State(control): State<ControlPlane>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Trigger>>> {
    tracing::debug!("Listing triggers of pipeline: {}", id);

    let triggers = pipeline_service::list_triggers(control.runtime().store.as_ref(), id).await?;
    Ok(Json(triggers))
}
