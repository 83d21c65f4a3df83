//! In-memory store
//!
//! Keeps every record behind one async mutex. Used by tests and by
//! `FERRY_STORE=memory` for single-process trials; it enforces the same
//! uniqueness rules as the Postgres partial indexes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::log::LogEntry;
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::Project;
use ferry_core::domain::trigger::{Trigger, TriggerKind};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BuildUpdate, DeploymentUpdate, Store, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    projects: HashMap<Uuid, Project>,
    pipelines: HashMap<Uuid, Pipeline>,
    triggers: HashMap<Uuid, Trigger>,
    builds: HashMap<Uuid, Build>,
    deployments: HashMap<Uuid, Deployment>,
    logs: HashMap<Uuid, Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn pipeline_busy(&self, pipeline_id: Uuid, except: Uuid) -> bool {
        self.builds
            .values()
            .any(|b| b.pipeline_id == pipeline_id && b.id != except && !b.status.is_terminal())
    }

    fn environment_busy(&self, build_id: Uuid, environment: &str, except: Uuid) -> bool {
        self.deployments.values().any(|d| {
            d.build_id == build_id
                && d.environment == environment
                && d.id != except
                && !d.status.is_terminal()
        })
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.state.lock().await.projects.get(&id).cloned())
    }

    async fn find_projects_by_repository(&self, repository: &str) -> StoreResult<Vec<Project>> {
        let state = self.state.lock().await;
        Ok(state
            .projects
            .values()
            .filter(|p| p.repository == repository)
            .cloned()
            .collect())
    }

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        Ok(self.state.lock().await.pipelines.get(&id).cloned())
    }

    async fn list_pipelines_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        let state = self.state.lock().await;
        let pipelines = state
            .pipelines
            .values()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        Ok(newest_first(pipelines, |p| p.created_at))
    }

    async fn set_pipeline_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Option<Pipeline>> {
        let mut state = self.state.lock().await;
        Ok(state.pipelines.get_mut(&id).map(|pipeline| {
            pipeline.enabled = enabled;
            pipeline.updated_at = Utc::now();
            pipeline.clone()
        }))
    }

    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn list_triggers(&self, pipeline_id: Uuid) -> StoreResult<Vec<Trigger>> {
        let state = self.state.lock().await;
        let mut triggers: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| t.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        triggers.sort_by_key(|t| t.created_at);
        Ok(triggers)
    }

    async fn list_active_schedule_triggers(&self) -> StoreResult<Vec<Trigger>> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.kind == TriggerKind::Schedule && t.active)
            .cloned()
            .collect())
    }

    async fn insert_build(&self, build: &Build) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        if !build.status.is_terminal() && state.pipeline_busy(build.pipeline_id, build.id) {
            return Err(StoreError::Conflict(format!(
                "pipeline {} already has a build in progress",
                build.pipeline_id
            )));
        }

        state.builds.insert(build.id, build.clone());
        Ok(())
    }

    async fn get_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
        Ok(self.state.lock().await.builds.get(&id).cloned())
    }

    async fn list_builds_by_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Build>> {
        let state = self.state.lock().await;
        let builds = state
            .builds
            .values()
            .filter(|b| b.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        Ok(newest_first(builds, |b| b.created_at))
    }

    async fn list_builds_by_status(&self, statuses: &[BuildStatus]) -> StoreResult<Vec<Build>> {
        let state = self.state.lock().await;
        let builds = state
            .builds
            .values()
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect();
        Ok(newest_first(builds, |b| b.created_at))
    }

    async fn transition_build(
        &self,
        id: Uuid,
        from: &[BuildStatus],
        update: BuildUpdate,
    ) -> StoreResult<Option<Build>> {
        let mut state = self.state.lock().await;

        let Some(build) = state.builds.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&build.status) {
            return Ok(None);
        }

        let now = Utc::now();
        build.status = update.status;
        build.updated_at = now;
        if update.status != BuildStatus::Pending && build.started_at.is_none() {
            build.started_at = Some(now);
        }
        if update.status.is_terminal() {
            build.completed_at = Some(now);
        }
        if let Some(commit) = update.commit {
            build.commit = Some(commit);
        }
        if let Some(name) = update.image_name {
            build.image_name = Some(name);
        }
        if let Some(tag) = update.image_tag {
            build.image_tag = Some(tag);
        }
        if let Some(failure) = update.failure {
            build.failed_stage = Some(failure.stage);
            build.failure_kind = Some(failure.kind);
            build.error_message = Some(failure.message);
        }

        Ok(Some(build.clone()))
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        if !deployment.status.is_terminal()
            && state.environment_busy(deployment.build_id, &deployment.environment, deployment.id)
        {
            return Err(StoreError::Conflict(format!(
                "build {} already has a deployment in progress for '{}'",
                deployment.build_id, deployment.environment
            )));
        }

        state.deployments.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: Uuid) -> StoreResult<Option<Deployment>> {
        Ok(self.state.lock().await.deployments.get(&id).cloned())
    }

    async fn list_deployments_by_build(&self, build_id: Uuid) -> StoreResult<Vec<Deployment>> {
        let state = self.state.lock().await;
        let deployments = state
            .deployments
            .values()
            .filter(|d| d.build_id == build_id)
            .cloned()
            .collect();
        Ok(newest_first(deployments, |d| d.created_at))
    }

    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>> {
        let state = self.state.lock().await;
        let deployments = state
            .deployments
            .values()
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect();
        Ok(newest_first(deployments, |d| d.created_at))
    }

    async fn transition_deployment(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        update: DeploymentUpdate,
    ) -> StoreResult<Option<Deployment>> {
        let mut state = self.state.lock().await;

        let Some(current) = state.deployments.get(&id) else {
            return Ok(None);
        };
        if !from.contains(&current.status) {
            return Ok(None);
        }
        if !update.status.is_terminal()
            && state.environment_busy(current.build_id, &current.environment, id)
        {
            return Err(StoreError::Conflict(format!(
                "build {} already has a deployment in progress for '{}'",
                current.build_id, current.environment
            )));
        }

        let Some(deployment) = state.deployments.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        deployment.status = update.status;
        deployment.updated_at = now;
        if update.status != DeploymentStatus::Pending && deployment.started_at.is_none() {
            deployment.started_at = Some(now);
        }
        if update.status.is_terminal() {
            deployment.completed_at = Some(now);
        }
        if let Some(image) = update.image {
            deployment.image = image;
        }
        if let Some(replicas) = update.replicas {
            deployment.replicas = replicas;
        }
        if let Some(failure) = update.failure {
            deployment.failed_stage = Some(failure.stage);
            deployment.failure_kind = Some(failure.kind);
            deployment.error_message = Some(failure.message);
        }
        if update.increment_rollbacks {
            deployment.rollback_count += 1;
        }
        if update.removed {
            deployment.removed_at = Some(now);
        }

        Ok(Some(deployment.clone()))
    }

    async fn append_logs(&self, execution_id: Uuid, entries: &[LogEntry]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .logs
            .entry(execution_id)
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .logs
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::build::BuildSource;
    use ferry_core::domain::git_ref::GitRef;

    fn build(pipeline_id: Uuid) -> Build {
        Build::new(
            pipeline_id,
            GitRef::Branch("main".into()),
            BuildSource::Manual,
            None,
        )
    }

    #[tokio::test]
    async fn test_one_non_terminal_build_per_pipeline() {
        let store = MemoryStore::new();
        let pipeline_id = Uuid::new_v4();

        let first = build(pipeline_id);
        store.insert_build(&first).await.unwrap();

        let second = build(pipeline_id);
        assert!(matches!(
            store.insert_build(&second).await,
            Err(StoreError::Conflict(_))
        ));

        // Another pipeline is unaffected
        store.insert_build(&build(Uuid::new_v4())).await.unwrap();

        store
            .transition_build(
                first.id,
                &[BuildStatus::Pending],
                BuildUpdate::to(BuildStatus::Cancelled),
            )
            .await
            .unwrap();
        store.insert_build(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let b = build(Uuid::new_v4());
        store.insert_build(&b).await.unwrap();

        let moved = store
            .transition_build(b.id, &[BuildStatus::Pending], BuildUpdate::to(BuildStatus::Cloning))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, BuildStatus::Cloning);
        assert!(moved.started_at.is_some());

        let stale = store
            .transition_build(b.id, &[BuildStatus::Pending], BuildUpdate::to(BuildStatus::Cancelled))
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(
            store.get_build(b.id).await.unwrap().unwrap().status,
            BuildStatus::Cloning
        );
    }
}
