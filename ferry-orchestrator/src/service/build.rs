//! Build Orchestrator
//!
//! Runs one build through `pending → cloning → building → pushing → success`.
//!
//! Every status change is a compare-and-set persisted before the stage's
//! adapter call. When a transition does not apply, someone else (a cancel
//! request or the reconciliation pass) has settled the build and the run
//! stops without writing anything further. The working copy is released
//! exactly once, whatever way the run ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::failure::{MAX_ERROR_SUMMARY, Stage, truncate_message};
use ferry_core::domain::pipeline::{BuildConfig, DeployTarget, Pipeline};
use ferry_core::domain::project::Project;
use ferry_core::dto::deployment::CreateDeployment;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::Runtime;
use super::cancel::CancelSignal;
use super::deployment::DeploymentOrchestrator;
use super::log_sink::ExecutionLog;
use super::stage::{guarded, is_cancellation, with_retry};
use crate::adapter::{ImageBuildRequest, ImageBuilder, SourceAdapter, SourceRequest};
use crate::error::{AdmissionError, OrchestratorError, Result};
use crate::repository::{BuildUpdate, Failure};

/// Statuses a build run can fail from; `pending` covers a first write-ahead
/// transition that errored
const RUNNING: [BuildStatus; 4] = [
    BuildStatus::Pending,
    BuildStatus::Cloning,
    BuildStatus::Building,
    BuildStatus::Pushing,
];

/// Everything a build run reads; loaded once at admission
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub build: Build,
    pub pipeline: Pipeline,
    pub project: Project,
    pub config: BuildConfig,
}

/// An error attributed to the stage it happened in
struct StageFailure {
    stage: Stage,
    error: OrchestratorError,
}

fn at(stage: Stage) -> impl Fn(OrchestratorError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Directory a build's working copy lives in
pub fn working_dir(workspace: &Path, build_id: Uuid) -> PathBuf {
    workspace.join(format!("build-{}", build_id))
}

pub struct BuildOrchestrator {
    runtime: Runtime,
    source: Arc<dyn SourceAdapter>,
    images: Arc<dyn ImageBuilder>,
    deployments: Arc<DeploymentOrchestrator>,
}

impl BuildOrchestrator {
    pub fn new(
        runtime: Runtime,
        source: Arc<dyn SourceAdapter>,
        images: Arc<dyn ImageBuilder>,
        deployments: Arc<DeploymentOrchestrator>,
    ) -> Self {
        Self {
            runtime,
            source,
            images,
            deployments,
        }
    }

    pub fn source(&self) -> &Arc<dyn SourceAdapter> {
        &self.source
    }

    /// Starts running an admitted `pending` build on its own task
    ///
    /// The cancel signal is registered before this returns, so a cancel
    /// request issued right after admission reaches the run.
    pub fn start(self: &Arc<Self>, ctx: BuildContext) -> JoinHandle<()> {
        let cancel = self.runtime.executions.register(ctx.build.id);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute(ctx, cancel).await })
    }

    /// Settles a non-terminal build as `cancelled` and stops its run
    pub async fn cancel(&self, build_id: Uuid) -> Result<Build> {
        let store = &self.runtime.store;
        let build = store
            .get_build(build_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("build", build_id))?;

        if build.status.is_terminal() {
            return Err(wrong_state(&build));
        }

        let cancelled = match store
            .transition_build(
                build_id,
                &BuildStatus::NON_TERMINAL,
                BuildUpdate::to(BuildStatus::Cancelled),
            )
            .await?
        {
            Some(cancelled) => cancelled,
            None => {
                // Settled between the read and the write
                let current = store
                    .get_build(build_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::not_found("build", build_id))?;
                return Err(wrong_state(&current));
            }
        };

        if let Some(log) = self.runtime.logs.get(build_id) {
            log.warn("Build cancelled");
        }
        let signalled = self.runtime.executions.cancel(build_id);

        tracing::info!("Build {} cancelled (run signalled: {})", build_id, signalled);
        Ok(cancelled)
    }

    async fn execute(self: Arc<Self>, ctx: BuildContext, cancel: CancelSignal) {
        let build_id = ctx.build.id;
        let log = self.runtime.logs.open(build_id);
        let dest = working_dir(&self.runtime.config.workspace_dir, build_id);
        let targets = ctx.config.deploy.clone();

        tracing::info!(
            "Build {} of pipeline {} started for {}",
            build_id,
            ctx.pipeline.name,
            ctx.build.source_ref
        );
        log.info(format!(
            "Build {} of pipeline '{}' for {} ({} trigger)",
            build_id,
            ctx.pipeline.name,
            ctx.build.source_ref,
            ctx.build.source.as_str()
        ));

        // Stages run on a task of their own so that a panic becomes a JoinError
        // here and cleanup still happens
        let stages = {
            let this = Arc::clone(&self);
            let log = Arc::clone(&log);
            let cancel = cancel.clone();
            let dest = dest.clone();
            tokio::spawn(async move { this.run_stages(&ctx, &dest, &log, &cancel).await })
        };
        let outcome = stages.await;

        if let Err(e) = self.source.release(&dest).await {
            tracing::warn!("Failed to release working copy of build {}: {}", build_id, e);
            log.warn(format!("Failed to remove working copy: {}", e));
        }

        match outcome {
            Ok(Ok(Some(build))) => {
                let image = build
                    .image()
                    .map(|image| image.to_string())
                    .unwrap_or_default();
                tracing::info!("Build {} succeeded: {}", build_id, image);
                log.info(format!("Build succeeded: {}", image));
                self.deploy_targets(&build, &targets, &log).await;
            }
            Ok(Ok(None)) => {
                tracing::info!("Build {} was settled elsewhere, run stopped", build_id);
                log.warn("Build was settled elsewhere, stopping");
            }
            Ok(Err(failure)) => self.settle_failure(build_id, failure, &log, &cancel).await,
            Err(join_error) => {
                tracing::error!("Build {} task aborted: {}", build_id, join_error);
                let stage = self.current_stage(build_id).await;
                let failure = StageFailure {
                    stage,
                    error: OrchestratorError::Internal("build task panicked".to_string()),
                };
                self.settle_failure(build_id, failure, &log, &cancel).await;
            }
        }

        self.runtime.logs.close(&log).await;
        self.runtime.executions.unregister(build_id, &cancel);
    }

    /// Returns the settled build, or `None` when a transition did not apply
    async fn run_stages(
        &self,
        ctx: &BuildContext,
        dest: &Path,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> std::result::Result<Option<Build>, StageFailure> {
        let store = &self.runtime.store;
        let config = &self.runtime.config;
        let build = &ctx.build;

        // ---- clone ----
        if store
            .transition_build(
                build.id,
                &[BuildStatus::Pending],
                BuildUpdate::to(BuildStatus::Cloning),
            )
            .await
            .map_err(|e| at(Stage::Clone)(e.into()))?
            .is_none()
        {
            return Ok(None);
        }

        let git_credentials = self
            .runtime
            .credentials
            .git(&ctx.project)
            .await
            .map_err(at(Stage::Clone))?;
        let request = SourceRequest {
            repo_url: ctx.project.git_url.clone(),
            git_ref: build.source_ref.clone(),
            commit: build.requested_commit.clone(),
        };

        let working_copy = {
            let source = self.source.as_ref();
            let request = &request;
            let credentials = git_credentials.as_ref();
            with_retry(
                Stage::Clone,
                config.budgets.clone,
                config.retry_backoff,
                cancel,
                log,
                move || source.acquire(request, dest, credentials, log, cancel),
            )
            .await
            .map_err(at(Stage::Clone))?
        };
        self.flush(log).await;

        // ---- build ----
        if store
            .transition_build(
                build.id,
                &[BuildStatus::Cloning],
                BuildUpdate::to(BuildStatus::Building).with_commit(&working_copy.commit),
            )
            .await
            .map_err(|e| at(Stage::Build)(e.into()))?
            .is_none()
        {
            return Ok(None);
        }

        let mut labels = ctx.config.labels.clone();
        labels.insert("ferry.build-id".to_string(), build.id.to_string());
        labels.insert("ferry.pipeline-id".to_string(), ctx.pipeline.id.to_string());
        labels.insert(
            "org.opencontainers.image.revision".to_string(),
            working_copy.commit.clone(),
        );

        let request = ImageBuildRequest {
            context_dir: working_copy.path.join(&ctx.config.context),
            dockerfile: working_copy.path.join(&ctx.config.dockerfile),
            image_name: ctx.config.image_name(&config.registry, &ctx.pipeline.name),
            image_tag: build.derive_image_tag(),
            build_args: ctx.config.build_args.clone(),
            labels,
        };

        // Builds are never retried
        let image = guarded(
            Stage::Build,
            config.budgets.build,
            cancel,
            self.images.build(&request, log, cancel),
        )
        .await
        .map_err(at(Stage::Build))?;
        self.flush(log).await;

        // ---- push ----
        if store
            .transition_build(
                build.id,
                &[BuildStatus::Building],
                BuildUpdate::to(BuildStatus::Pushing),
            )
            .await
            .map_err(|e| at(Stage::Push)(e.into()))?
            .is_none()
        {
            return Ok(None);
        }

        if !ctx.config.push {
            log.info("Push disabled by the pipeline configuration");
        } else if self.images.publishes_on_build() {
            log.info("Image was published by the build");
        } else {
            let registry_credentials = self
                .runtime
                .credentials
                .registry(&ctx.project)
                .await
                .map_err(at(Stage::Push))?;

            let images = self.images.as_ref();
            let image = &image;
            let credentials = registry_credentials.as_ref();
            with_retry(
                Stage::Push,
                config.budgets.push,
                config.retry_backoff,
                cancel,
                log,
                move || images.push(image, credentials, log, cancel),
            )
            .await
            .map_err(at(Stage::Push))?;
        }
        self.flush(log).await;

        // ---- success ----
        store
            .transition_build(
                build.id,
                &[BuildStatus::Pushing],
                BuildUpdate::to(BuildStatus::Success).with_image(&image.name, &image.tag),
            )
            .await
            .map_err(|e| at(Stage::Push)(e.into()))
    }

    async fn settle_failure(
        &self,
        build_id: Uuid,
        failure: StageFailure,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) {
        if cancel.is_cancelled() || is_cancellation(&failure.error) {
            log.warn(format!("Build stopped during {}", failure.stage));
            return;
        }

        let message = truncate_message(&failure.error.to_string(), MAX_ERROR_SUMMARY);
        log.error(&message);

        let update = BuildUpdate::to(BuildStatus::Failed).with_failure(Failure {
            stage: failure.stage,
            kind: failure.error.failure_kind(),
            message: message.clone(),
        });

        // Retried once after a store error
        for attempt in 0..2 {
            match self
                .runtime
                .store
                .transition_build(build_id, &RUNNING, update.clone())
                .await
            {
                Ok(Some(_)) => {
                    tracing::info!("Build {} failed: {}", build_id, message);
                    return;
                }
                Ok(None) => {
                    tracing::debug!("Build {} was already settled", build_id);
                    return;
                }
                Err(e) if attempt == 0 => {
                    tracing::warn!("Recording failure of build {} failed, retrying: {}", build_id, e);
                    tokio::time::sleep(self.runtime.config.retry_backoff).await;
                }
                Err(e) => {
                    tracing::error!("Failed to record failure of build {}: {}", build_id, e)
                }
            }
        }
    }

    /// Stage a build is in according to its persisted status
    async fn current_stage(&self, build_id: Uuid) -> Stage {
        match self.runtime.store.get_build(build_id).await {
            Ok(Some(build)) => match build.status {
                BuildStatus::Building => Stage::Build,
                BuildStatus::Pushing => Stage::Push,
                _ => Stage::Clone,
            },
            _ => Stage::Clone,
        }
    }

    async fn deploy_targets(&self, build: &Build, targets: &[DeployTarget], log: &ExecutionLog) {
        for target in targets {
            let request = CreateDeployment {
                build_id: build.id,
                environment: target.environment.clone(),
                replicas: target.replicas,
                namespace: target.namespace.clone(),
                service_name: target.service_name.clone(),
                ingress_host: target.ingress_host.clone(),
            };

            match self.deployments.deploy(request).await {
                Ok(deployment) => log.info(format!(
                    "Deployment {} to '{}' submitted",
                    deployment.id, deployment.environment
                )),
                Err(e) => {
                    tracing::warn!(
                        "Automatic deployment of build {} to {} rejected: {}",
                        build.id,
                        target.environment,
                        e
                    );
                    log.warn(format!(
                        "Could not deploy to '{}': {}",
                        target.environment, e
                    ));
                }
            }
        }
    }

    async fn flush(&self, log: &ExecutionLog) {
        if let Err(e) = self.runtime.logs.flush(log).await {
            tracing::warn!("Failed to flush logs of build {}: {}", log.execution_id(), e);
        }
    }
}

fn wrong_state(build: &Build) -> OrchestratorError {
    AdmissionError::WrongState {
        entity: "build",
        id: build.id,
        actual: build.status.to_string(),
        expected: "pending, cloning, building or pushing",
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;
    use crate::repository::Store;
    use crate::testing::{Harness, wait_for_build};
    use ferry_core::domain::build::BuildSource;
    use ferry_core::domain::failure::FailureKind;
    use ferry_core::domain::git_ref::GitRef;
    use std::time::Duration;

    #[tokio::test]
    async fn test_manual_run_succeeds_with_commit_and_tag() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        assert_eq!(build.status, BuildStatus::Pending);

        let done = wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        assert_eq!(done.commit.as_deref(), Some(harness.source.commit()));
        assert_eq!(done.image_tag.as_deref(), Some(build.derive_image_tag().as_str()));
        assert_eq!(done.image_name.as_deref(), Some("registry.test/p1"));
        assert!(done.completed_at.is_some());

        let built = harness.images.built();
        assert_eq!(built.len(), 1);
        assert_eq!(
            built[0].labels.get("ferry.build-id"),
            Some(&build.id.to_string())
        );
        assert_eq!(harness.images.pushed().len(), 1);

        harness.settle().await;
        assert_eq!(harness.source.released(), 1);
    }

    #[tokio::test]
    async fn test_transient_clone_error_releases_once() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        harness.source.fail_with(vec![
            AdapterError::transient("connection reset"),
            AdapterError::transient("connection reset"),
        ]);

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        let done = wait_for_build(&harness.store, build.id, BuildStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Clone));
        assert_eq!(done.failure_kind, Some(FailureKind::Transient));
        assert_eq!(harness.source.attempts(), 2);

        harness.settle().await;
        assert_eq!(harness.source.released(), 1);
    }

    #[tokio::test]
    async fn test_single_transient_clone_error_is_retried() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        harness
            .source
            .fail_with(vec![AdapterError::transient("connection reset")]);

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        assert_eq!(harness.source.attempts(), 2);
    }

    #[tokio::test]
    async fn test_build_error_is_not_retried() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        harness
            .images
            .fail_build_with(AdapterError::transient("builder crashed"));

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        let done = wait_for_build(&harness.store, build.id, BuildStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Build));
        assert_eq!(harness.images.build_attempts(), 1);
        assert!(done.error_message.unwrap().contains("builder crashed"));
    }

    #[tokio::test]
    async fn test_cancel_during_build_stays_cancelled() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let gate = harness.images.hold_builds();

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Building).await;

        let cancelled = harness.control.cancel_build(build.id).await.unwrap();
        assert_eq!(cancelled.status, BuildStatus::Cancelled);

        // The builder finishes late; nothing may override the cancellation
        gate.notify_one();
        harness.settle().await;

        let after = harness.control.get_build(build.id).await.unwrap();
        assert_eq!(after.status, BuildStatus::Cancelled);
        assert!(after.image_name.is_none());
        assert_eq!(harness.source.released(), 1);
        assert!(harness.images.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_late_success_after_external_settle_is_discarded() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let gate = harness.images.hold_builds();

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Building).await;

        // Settled by another actor without reaching the run's cancel signal
        harness
            .store
            .transition_build(
                build.id,
                &[BuildStatus::Building],
                BuildUpdate::to(BuildStatus::Cancelled),
            )
            .await
            .unwrap()
            .unwrap();

        gate.notify_one();
        harness.settle().await;

        let after = harness.control.get_build(build.id).await.unwrap();
        assert_eq!(after.status, BuildStatus::Cancelled);
        assert_eq!(harness.images.built().len(), 1);
        assert!(harness.images.pushed().is_empty());
        assert_eq!(harness.source.released(), 1);
    }

    #[tokio::test]
    async fn test_cancel_of_finished_build_is_rejected() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;

        let err = harness.control.cancel_build(build.id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Admission(AdmissionError::WrongState { .. })
        ));
    }

    #[tokio::test]
    async fn test_push_disabled_skips_push() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", r#"{"push": false}"#).await;

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        assert!(harness.images.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_runs_get_distinct_images() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;

        let first = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        let first = wait_for_build(&harness.store, first.id, BuildStatus::Success).await;
        harness.settle().await;

        let second = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        let second = wait_for_build(&harness.store, second.id, BuildStatus::Success).await;

        assert_ne!(first.image(), second.image());
    }

    #[tokio::test]
    async fn test_build_timeout_is_recorded() {
        let harness = Harness::with_config(|config| {
            config.budgets.build = Duration::from_millis(50);
        });
        let pipeline = harness.pipeline("P1", "").await;
        let _gate = harness.images.hold_builds();

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        let done = wait_for_build(&harness.store, build.id, BuildStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Build));
        assert_eq!(done.failure_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_logs_are_persisted_after_the_run() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;

        let persisted = harness.store.list_logs(build.id).await.unwrap();
        assert!(persisted.iter().any(|e| e.message.starts_with("Build succeeded")));
    }

    #[tokio::test]
    async fn test_output_of_a_running_stage_reaches_the_store() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let gate = harness.images.hold_builds();

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Building).await;

        let logs = &harness.control.runtime().logs;
        let mut persisted = Vec::new();
        for _ in 0..200 {
            assert_eq!(logs.flush_live().await, 0);
            persisted = harness.store.list_logs(build.id).await.unwrap();
            if persisted.iter().any(|e| e.message.starts_with("STEP 0/1")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(persisted.iter().any(|e| e.message.starts_with("STEP 0/1")));

        // Still running: the build is held in its build stage
        let current = harness.control.get_build(build.id).await.unwrap();
        assert_eq!(current.status, BuildStatus::Building);

        gate.notify_one();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;

        // Nothing was persisted twice
        let persisted = harness.store.list_logs(build.id).await.unwrap();
        let steps = persisted
            .iter()
            .filter(|e| e.message.starts_with("STEP 0/1"))
            .count();
        assert_eq!(steps, 1);
    }

    #[tokio::test]
    async fn test_store_error_on_first_transition_fails_the_build() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        harness.fail_transitions(1);

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();

        let done = wait_for_build(&harness.store, build.id, BuildStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Clone));
        assert_eq!(done.failure_kind, Some(FailureKind::Internal));
        assert_eq!(harness.source.attempts(), 0);
        harness.settle().await;

        // The pipeline is not left busy
        let next = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, next.id, BuildStatus::Success).await;
    }
}
