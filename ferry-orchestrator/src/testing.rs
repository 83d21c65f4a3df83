//! Test support
//!
//! Recording fakes for the three adapters and a [`Harness`] wiring them to a
//! [`ControlPlane`] over the in-memory store.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::domain::build::{Build, BuildStatus, ImageRef};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::log::LogEntry;
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::{Project, normalize_repository};
use ferry_core::domain::trigger::{Trigger, TriggerKind};
use ferry_core::dto::pipeline::{CreatePipeline, CreateTrigger};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::adapter::{
    AdapterError, AdapterResult, ClusterAdapter, ImageBuildRequest, ImageBuilder, ReadinessInfo,
    SourceAdapter, SourceRequest, WorkingCopy, WorkloadRef, WorkloadSpec,
};
use crate::config::{Config, StoreKind};
use crate::repository::{
    BuildUpdate, DeploymentUpdate, MemoryStore, Store, StoreError, StoreResult,
};
use crate::service::cancel::CancelSignal;
use crate::service::credentials::{BasicCredentials, ClusterCredentials, EnvCredentials};
use crate::service::dispatcher::Dispatcher;
use crate::service::log_sink::ExecutionLog;
use crate::service::reconcile::Reconciler;
use crate::service::{ControlPlane, Runtime, pipeline_service};

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(5);

// =============================================================================
// Source
// =============================================================================

pub struct FakeSource {
    commit: String,
    attempts: AtomicUsize,
    released: AtomicUsize,
    failures: Mutex<VecDeque<AdapterError>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            commit: "3f786850e387550fdab836ed7e6dc881de23001b".to_string(),
            attempts: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// The next acquisitions fail with these errors, in order
    pub fn fail_with(&self, errors: Vec<AdapterError>) {
        self.failures.lock().unwrap().extend(errors);
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn acquire(
        &self,
        request: &SourceRequest,
        dest: &Path,
        _credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        _cancel: &CancelSignal,
    ) -> AdapterResult<WorkingCopy> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        log.info(format!("Fetched {} at {}", request.repo_url, request.git_ref));
        Ok(WorkingCopy {
            path: dest.to_path_buf(),
            commit: request.commit.clone().unwrap_or_else(|| self.commit.clone()),
        })
    }

    async fn release(&self, dest: &Path) -> AdapterResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        let _ = tokio::fs::remove_dir_all(dest).await;
        Ok(())
    }
}

// =============================================================================
// Image
// =============================================================================

#[derive(Default)]
pub struct FakeImageBuilder {
    built: Mutex<Vec<ImageBuildRequest>>,
    pushed: Mutex<Vec<ImageRef>>,
    build_failure: Mutex<Option<AdapterError>>,
    build_attempts: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeImageBuilder {
    pub fn built(&self) -> Vec<ImageBuildRequest> {
        self.built.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<ImageRef> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn build_attempts(&self) -> usize {
        self.build_attempts.load(Ordering::SeqCst)
    }

    /// Every build fails with `err`
    pub fn fail_build_with(&self, err: AdapterError) {
        *self.build_failure.lock().unwrap() = Some(err);
    }

    /// Builds wait for a notification before finishing
    pub fn hold_builds(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl ImageBuilder for FakeImageBuilder {
    async fn build(
        &self,
        request: &ImageBuildRequest,
        log: &ExecutionLog,
        _cancel: &CancelSignal,
    ) -> AdapterResult<ImageRef> {
        self.build_attempts.fetch_add(1, Ordering::SeqCst);
        request.validate()?;
        log.info(format!("STEP 0/1: building {}", request.image_ref()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = self.build_failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }

        log.info(format!("STEP 1/1: built {}", request.image_ref()));
        self.built.lock().unwrap().push(request.clone());
        Ok(request.image_ref())
    }

    async fn push(
        &self,
        image: &ImageRef,
        _credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        _cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        log.info(format!("Pushed {}", image));
        self.pushed.lock().unwrap().push(image.clone());
        Ok(())
    }
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Default)]
struct ClusterState {
    applied: Vec<WorkloadSpec>,
    images: HashMap<String, String>,
    replicas: HashMap<String, i32>,
    scaled: Vec<(String, i32)>,
    deleted: Vec<String>,
    rollbacks: usize,
    rolled_back_image: Option<String>,
}

pub struct FakeCluster {
    revision_history: bool,
    never_ready: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new(revision_history: bool) -> Self {
        Self {
            revision_history,
            never_ready: AtomicBool::new(false),
            gate: Mutex::new(None),
            state: Mutex::new(ClusterState::default()),
        }
    }

    pub fn applied(&self) -> Vec<WorkloadSpec> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn scaled(&self) -> Vec<(String, i32)> {
        self.state.lock().unwrap().scaled.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    /// Image the workload runs after a revision rollback
    pub fn set_rolled_back_image(&self, image: &str) {
        self.state.lock().unwrap().rolled_back_image = Some(image.to_string());
    }

    /// Workloads never report their replicas as ready
    pub fn never_ready(&self) {
        self.never_ready.store(true, Ordering::SeqCst);
    }

    pub fn ready_again(&self) {
        self.never_ready.store(false, Ordering::SeqCst);
    }

    /// Applies wait for a notification before finishing
    pub fn hold_applies(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl ClusterAdapter for FakeCluster {
    async fn apply(
        &self,
        spec: &WorkloadSpec,
        _credentials: &ClusterCredentials,
        log: &ExecutionLog,
        _cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.applied.push(spec.clone());
        state.images.insert(spec.name.clone(), spec.image.clone());
        state.replicas.insert(spec.name.clone(), spec.replicas);
        log.info(format!("deployment.apps/{} configured", spec.name));
        Ok(())
    }

    async fn scale(
        &self,
        workload: &WorkloadRef,
        replicas: i32,
        _credentials: &ClusterCredentials,
        _cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.scaled.push((workload.name.clone(), replicas));
        state.replicas.insert(workload.name.clone(), replicas);
        Ok(())
    }

    async fn get_status(
        &self,
        workload: &WorkloadRef,
        _credentials: &ClusterCredentials,
        _cancel: &CancelSignal,
    ) -> AdapterResult<ReadinessInfo> {
        let state = self.state.lock().unwrap();
        let Some(image) = state.images.get(&workload.name) else {
            return Err(AdapterError::not_found(format!(
                "deployments.apps \"{}\" not found",
                workload.name
            )));
        };
        let desired = state.replicas.get(&workload.name).copied().unwrap_or(1);
        let ready = if self.never_ready.load(Ordering::SeqCst) {
            0
        } else {
            desired
        };

        Ok(ReadinessInfo {
            desired,
            ready,
            available: ready,
            updated: ready,
            generation: 1,
            observed_generation: 1,
            image: Some(image.clone()),
            revision: Some(1),
        })
    }

    async fn rollback(
        &self,
        workload: &WorkloadRef,
        _credentials: &ClusterCredentials,
        log: &ExecutionLog,
        _cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.rollbacks += 1;
        if let Some(image) = state.rolled_back_image.clone() {
            state.images.insert(workload.name.clone(), image);
        }
        log.info(format!("deployment.apps/{} rolled back", workload.name));
        Ok(())
    }

    async fn delete(
        &self,
        workload: &WorkloadRef,
        _credentials: &ClusterCredentials,
        _cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(workload.name.clone());
        state.images.remove(&workload.name);
        Ok(())
    }

    async fn get_logs(
        &self,
        workload: &WorkloadRef,
        tail_lines: i64,
        _credentials: &ClusterCredentials,
        _cancel: &CancelSignal,
    ) -> AdapterResult<String> {
        Ok(format!(
            "[pod/{}-7d9f] listening on :8080 (last {} lines)\n",
            workload.name, tail_lines
        ))
    }

    fn supports_revision_history(&self) -> bool {
        self.revision_history
    }
}

// =============================================================================
// Store
// =============================================================================

/// [`MemoryStore`] whose next status transitions can be made to fail
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_transitions: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_transitions: AtomicUsize::new(0),
        }
    }

    fn fail_transition(&self) -> StoreResult<()> {
        let took = self
            .failing_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.inner.insert_project(project).await
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        self.inner.get_project(id).await
    }

    async fn find_projects_by_repository(&self, repository: &str) -> StoreResult<Vec<Project>> {
        self.inner.find_projects_by_repository(repository).await
    }

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        self.inner.insert_pipeline(pipeline).await
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        self.inner.get_pipeline(id).await
    }

    async fn list_pipelines_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        self.inner.list_pipelines_by_project(project_id).await
    }

    async fn set_pipeline_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Option<Pipeline>> {
        self.inner.set_pipeline_enabled(id, enabled).await
    }

    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        self.inner.insert_trigger(trigger).await
    }

    async fn list_triggers(&self, pipeline_id: Uuid) -> StoreResult<Vec<Trigger>> {
        self.inner.list_triggers(pipeline_id).await
    }

    async fn list_active_schedule_triggers(&self) -> StoreResult<Vec<Trigger>> {
        self.inner.list_active_schedule_triggers().await
    }

    async fn insert_build(&self, build: &Build) -> StoreResult<()> {
        self.inner.insert_build(build).await
    }

    async fn get_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
        self.inner.get_build(id).await
    }

    async fn list_builds_by_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Build>> {
        self.inner.list_builds_by_pipeline(pipeline_id).await
    }

    async fn list_builds_by_status(&self, statuses: &[BuildStatus]) -> StoreResult<Vec<Build>> {
        self.inner.list_builds_by_status(statuses).await
    }

    async fn transition_build(
        &self,
        id: Uuid,
        from: &[BuildStatus],
        update: BuildUpdate,
    ) -> StoreResult<Option<Build>> {
        self.fail_transition()?;
        self.inner.transition_build(id, from, update).await
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> StoreResult<()> {
        self.inner.insert_deployment(deployment).await
    }

    async fn get_deployment(&self, id: Uuid) -> StoreResult<Option<Deployment>> {
        self.inner.get_deployment(id).await
    }

    async fn list_deployments_by_build(&self, build_id: Uuid) -> StoreResult<Vec<Deployment>> {
        self.inner.list_deployments_by_build(build_id).await
    }

    async fn list_deployments_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>> {
        self.inner.list_deployments_by_status(statuses).await
    }

    async fn transition_deployment(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        update: DeploymentUpdate,
    ) -> StoreResult<Option<Deployment>> {
        self.fail_transition()?;
        self.inner.transition_deployment(id, from, update).await
    }

    async fn append_logs(&self, execution_id: Uuid, entries: &[LogEntry]) -> StoreResult<()> {
        self.inner.append_logs(execution_id, entries).await
    }

    async fn list_logs(&self, execution_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        self.inner.list_logs(execution_id).await
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub images: Arc<FakeImageBuilder>,
    pub cluster: Arc<FakeCluster>,
    pub control: ControlPlane,
    flaky: Arc<FlakyStore>,
    project: Project,
    workspace: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true, |_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(true, adjust)
    }

    /// Harness whose cluster cannot undo a rollout by itself
    pub fn without_revision_history() -> Self {
        Self::build(false, |_| {})
    }

    pub fn without_revision_history_with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(false, adjust)
    }

    fn build(revision_history: bool, adjust: impl FnOnce(&mut Config)) -> Self {
        let workspace = std::env::temp_dir().join(format!("ferry-test-{}", Uuid::new_v4()));
        let mut config = Config {
            store: StoreKind::Memory,
            workspace_dir: workspace.clone(),
            registry: "registry.test".to_string(),
            readiness_poll: Duration::from_millis(5),
            retry_backoff: Duration::from_millis(10),
            ..Config::default()
        };
        config.budgets.clone = Duration::from_secs(5);
        config.budgets.build = Duration::from_secs(5);
        config.budgets.push = Duration::from_secs(5);
        config.budgets.apply = Duration::from_secs(5);
        config.budgets.readiness = Duration::from_secs(5);
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::new());
        let images = Arc::new(FakeImageBuilder::default());
        let cluster = Arc::new(FakeCluster::new(revision_history));

        let credentials = Arc::new(EnvCredentials::from_config(&config));
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let runtime = Runtime::new(flaky.clone(), credentials, config);
        let control = ControlPlane::new(runtime, source.clone(), images.clone(), cluster.clone());

        let git_url = "https://github.com/acme/web.git".to_string();
        let project = Project {
            id: Uuid::new_v4(),
            name: "web".to_string(),
            repository: normalize_repository(&git_url),
            git_url,
            git_provider: "github".to_string(),
            created_at: Utc::now(),
        };

        Self {
            store,
            source,
            images,
            cluster,
            control,
            flaky,
            project,
            workspace,
        }
    }

    /// Creates an enabled pipeline in the harness project
    pub async fn pipeline(&self, name: &str, config: &str) -> Pipeline {
        self.store.insert_project(&self.project).await.unwrap();
        pipeline_service::create_pipeline(
            self.store.as_ref(),
            CreatePipeline {
                project_id: self.project.id,
                name: name.to_string(),
                description: None,
                config: config.to_string(),
            },
        )
        .await
        .unwrap()
    }

    /// Stores a pipeline without validating its configuration
    pub async fn pipeline_unchecked(&self, name: &str, config: &str) -> Pipeline {
        self.store.insert_project(&self.project).await.unwrap();
        let now = Utc::now();
        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            project_id: self.project.id,
            name: name.to_string(),
            description: None,
            config: config.to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_pipeline(&pipeline).await.unwrap();
        pipeline
    }

    pub async fn trigger(
        &self,
        pipeline_id: Uuid,
        kind: TriggerKind,
        branch: Option<&str>,
        tag: Option<&str>,
    ) -> Trigger {
        pipeline_service::create_trigger(
            self.store.as_ref(),
            pipeline_id,
            CreateTrigger {
                kind,
                branch: branch.map(String::from),
                tag: tag.map(String::from),
                schedule: None,
            },
        )
        .await
        .unwrap()
    }

    pub async fn schedule(&self, pipeline_id: Uuid, branch: &str, cron: &str) -> Trigger {
        pipeline_service::create_trigger(
            self.store.as_ref(),
            pipeline_id,
            CreateTrigger {
                kind: TriggerKind::Schedule,
                branch: Some(branch.to_string()),
                tag: None,
                schedule: Some(cron.to_string()),
            },
        )
        .await
        .unwrap()
    }

    pub async fn disable(&self, pipeline_id: Uuid) {
        pipeline_service::set_enabled(self.store.as_ref(), pipeline_id, false)
            .await
            .unwrap();
    }

    /// The next `count` status transitions made by the services fail with a
    /// database error
    pub fn fail_transitions(&self, count: usize) {
        self.flaky.failing_transitions.store(count, Ordering::SeqCst);
    }

    pub fn repository(&self) -> &str {
        &self.project.repository
    }

    pub fn git_url(&self) -> &str {
        &self.project.git_url
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.control.dispatcher()
    }

    pub fn reconciler(&self) -> Reconciler {
        self.control.reconciler()
    }

    /// Waits until no build or deployment is running
    pub async fn settle(&self) {
        let executions = &self.control.runtime().executions;
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;

        while !executions.running_ids().is_empty() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "executions still running: {:?}",
                executions.running_ids()
            );
            tokio::time::sleep(POLL).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

/// Polls until the build reaches `status`
pub async fn wait_for_build(store: &MemoryStore, id: Uuid, status: BuildStatus) -> Build {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let build = store.get_build(id).await.unwrap().expect("build exists");
        if build.status == status {
            return build;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "build {} is {}, expected {}",
            id,
            build.status,
            status
        );
        tokio::time::sleep(POLL).await;
    }
}

/// Polls until the deployment reaches `status`
pub async fn wait_for_deployment(
    store: &MemoryStore,
    id: Uuid,
    status: DeploymentStatus,
) -> Deployment {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let deployment = store
            .get_deployment(id)
            .await
            .unwrap()
            .expect("deployment exists");
        if deployment.status == status {
            return deployment;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "deployment {} is {}, expected {}",
            id,
            deployment.status,
            status
        );
        tokio::time::sleep(POLL).await;
    }
}
