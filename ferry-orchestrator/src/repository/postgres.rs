//! Postgres-backed [`Store`]
//!
//! Delegates to the per-entity repository functions and turns unique index
//! violations into [`StoreError::Conflict`].

use async_trait::async_trait;
use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::log::LogEntry;
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::Project;
use ferry_core::domain::trigger::Trigger;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    BuildUpdate, DeploymentUpdate, Store, StoreError, StoreResult, build as build_repository,
    deployment as deployment_repository, log as log_repository, pipeline as pipeline_repository,
    project as project_repository, trigger as trigger_repository,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps a unique violation to a conflict described by `what`
fn conflict_or(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(what());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        Ok(project_repository::create(&self.pool, project).await?)
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(project_repository::find_by_id(&self.pool, id).await?)
    }

    async fn find_projects_by_repository(&self, repository: &str) -> StoreResult<Vec<Project>> {
        Ok(project_repository::find_by_repository(&self.pool, repository).await?)
    }

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        Ok(pipeline_repository::create(&self.pool, pipeline).await?)
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        Ok(pipeline_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list_pipelines_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        Ok(pipeline_repository::find_by_project(&self.pool, project_id).await?)
    }

    async fn set_pipeline_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Option<Pipeline>> {
        Ok(pipeline_repository::set_enabled(&self.pool, id, enabled).await?)
    }

    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        Ok(trigger_repository::create(&self.pool, trigger).await?)
    }

    async fn list_triggers(&self, pipeline_id: Uuid) -> StoreResult<Vec<Trigger>> {
        Ok(trigger_repository::find_by_pipeline(&self.pool, pipeline_id).await?)
    }

    async fn list_active_schedule_triggers(&self) -> StoreResult<Vec<Trigger>> {
        Ok(trigger_repository::find_active_schedules(&self.pool).await?)
    }

    async fn insert_build(&self, build: &Build) -> StoreResult<()> {
        build_repository::create(&self.pool, build)
            .await
            .map_err(|e| {
                conflict_or(e, || {
                    format!(
                        "pipeline {} already has a build in progress",
                        build.pipeline_id
                    )
                })
            })
    }

    async fn get_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
        Ok(build_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list_builds_by_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Build>> {
        Ok(build_repository::find_by_pipeline(&self.pool, pipeline_id).await?)
    }

    async fn list_builds_by_status(&self, statuses: &[BuildStatus]) -> StoreResult<Vec<Build>> {
        Ok(build_repository::find_by_status(&self.pool, statuses).await?)
    }

    async fn transition_build(
        &self,
        id: Uuid,
        from: &[BuildStatus],
        update: BuildUpdate,
    ) -> StoreResult<Option<Build>> {
        Ok(build_repository::transition(&self.pool, id, from, update).await?)
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> StoreResult<()> {
        deployment_repository::create(&self.pool, deployment)
            .await
            .map_err(|e| {
                conflict_or(e, || {
                    format!(
                        "build {} already has a deployment in progress for '{}'",
                        deployment.build_id, deployment.environment
                    )
                })
            })
    }

    async fn get_deployment(&self, id: Uuid) -> StoreResult<Option<Deployment>> {
        Ok(deployment_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list_deployments_by_build(&self, build_id: Uuid) -> StoreResult<Vec<Deployment>> {
        Ok(deployment_repository::find_by_build(&self.pool, build_id).await?)
    }

    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>> {
        Ok(deployment_repository::find_by_status(&self.pool, statuses).await?)
    }

    async fn transition_deployment(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        update: DeploymentUpdate,
    ) -> StoreResult<Option<Deployment>> {
        deployment_repository::transition(&self.pool, id, from, update)
            .await
            .map_err(|e| {
                conflict_or(e, || {
                    format!("deployment {} collides with another active deployment", id)
                })
            })
    }

    async fn append_logs(&self, execution_id: Uuid, entries: &[LogEntry]) -> StoreResult<()> {
        Ok(log_repository::add_entries(&self.pool, execution_id, entries).await?)
    }

    async fn list_logs(&self, execution_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        Ok(log_repository::find_by_execution(&self.pool, execution_id).await?)
    }
}
