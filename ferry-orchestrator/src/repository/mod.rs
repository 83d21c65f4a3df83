//! Repository Module
//!
//! Data access layer for the orchestrator.
//!
//! The [`Store`] trait is the only way services reach persisted records. It is
//! pure storage: it never interprets state machines beyond the compare-and-set
//! conditions it is handed. Two implementations exist: [`PgStore`], backed by
//! Postgres with one repository file per entity, and [`MemoryStore`], which
//! keeps everything behind a mutex and gives the same uniqueness guarantees.

pub mod build;
pub mod deployment;
pub mod log;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod project;
pub mod trigger;

use async_trait::async_trait;
use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::failure::{FailureKind, Stage};
use ferry_core::domain::log::LogEntry;
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::Project;
use ferry_core::domain::trigger::Trigger;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness rule rejected the write
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure classification written alongside a terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

/// Fields written by a build status transition
///
/// `started_at` is stamped on the first move out of `pending` and
/// `completed_at` on any move into a terminal status.
#[derive(Debug, Clone)]
pub struct BuildUpdate {
    pub status: BuildStatus,
    pub commit: Option<String>,
    pub image_name: Option<String>,
    pub image_tag: Option<String>,
    pub failure: Option<Failure>,
}

impl BuildUpdate {
    pub fn to(status: BuildStatus) -> Self {
        Self {
            status,
            commit: None,
            image_name: None,
            image_tag: None,
            failure: None,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_image(mut self, name: impl Into<String>, tag: impl Into<String>) -> Self {
        self.image_name = Some(name.into());
        self.image_tag = Some(tag.into());
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Fields written by a deployment status transition
#[derive(Debug, Clone)]
pub struct DeploymentUpdate {
    pub status: DeploymentStatus,
    pub image: Option<String>,
    pub replicas: Option<i32>,
    pub failure: Option<Failure>,
    pub increment_rollbacks: bool,
    pub removed: bool,
}

impl DeploymentUpdate {
    pub fn to(status: DeploymentStatus) -> Self {
        Self {
            status,
            image: None,
            replicas: None,
            failure: None,
            increment_rollbacks: false,
            removed: false,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn rolled_back(mut self) -> Self {
        self.increment_rollbacks = true;
        self
    }

    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }
}

/// Persistence collaborator
///
/// Lists are ordered newest first unless noted. Builds and deployments are
/// never deleted.
#[async_trait]
pub trait Store: Send + Sync {
    // Projects
    async fn insert_project(&self, project: &Project) -> StoreResult<()>;
    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn find_projects_by_repository(&self, repository: &str) -> StoreResult<Vec<Project>>;

    // Pipelines
    async fn insert_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()>;
    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>>;
    async fn list_pipelines_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Pipeline>>;
    async fn set_pipeline_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Option<Pipeline>>;

    // Triggers
    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()>;
    async fn list_triggers(&self, pipeline_id: Uuid) -> StoreResult<Vec<Trigger>>;
    async fn list_active_schedule_triggers(&self) -> StoreResult<Vec<Trigger>>;

    // Builds

    /// Fails with [`StoreError::Conflict`] when the pipeline already has a
    /// non-terminal build
    async fn insert_build(&self, build: &Build) -> StoreResult<()>;
    async fn get_build(&self, id: Uuid) -> StoreResult<Option<Build>>;
    async fn list_builds_by_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Build>>;
    async fn list_builds_by_status(&self, statuses: &[BuildStatus]) -> StoreResult<Vec<Build>>;

    /// Applies `update` only if the build's status is one of `from`.
    /// Returns the updated record, or `None` when the condition did not hold.
    async fn transition_build(
        &self,
        id: Uuid,
        from: &[BuildStatus],
        update: BuildUpdate,
    ) -> StoreResult<Option<Build>>;

    // Deployments

    /// Fails with [`StoreError::Conflict`] when the (build, environment) pair
    /// already has a non-terminal deployment
    async fn insert_deployment(&self, deployment: &Deployment) -> StoreResult<()>;
    async fn get_deployment(&self, id: Uuid) -> StoreResult<Option<Deployment>>;
    async fn list_deployments_by_build(&self, build_id: Uuid) -> StoreResult<Vec<Deployment>>;
    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>>;

    /// Compare-and-set, as [`Store::transition_build`]
    async fn transition_deployment(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        update: DeploymentUpdate,
    ) -> StoreResult<Option<Deployment>>;

    // Execution logs, oldest first
    async fn append_logs(&self, execution_id: Uuid, entries: &[LogEntry]) -> StoreResult<()>;
    async fn list_logs(&self, execution_id: Uuid) -> StoreResult<Vec<LogEntry>>;
}
