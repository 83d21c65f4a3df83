//! Deployment Orchestrator
//!
//! Rolls a successful build's image out to one environment and keeps the
//! deployment record in step with the cluster:
//!
//! - `pending → applying → success | failed`, cancellable until `success`
//! - `success → rollback_requested → rolling_back → success | failed`
//!
//! Scaling, teardown and workload logs act on a `success` deployment
//! synchronously.

use std::sync::Arc;

use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus, is_dns_label};
use ferry_core::domain::failure::{MAX_ERROR_SUMMARY, Stage, truncate_message};
use ferry_core::domain::pipeline::BuildConfig;
use ferry_core::dto::deployment::CreateDeployment;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::Runtime;
use super::cancel::CancelSignal;
use super::credentials::ClusterCredentials;
use super::log_sink::ExecutionLog;
use super::stage::{guarded, is_cancellation, with_retry};
use crate::adapter::{
    AdapterError, AdapterErrorKind, ClusterAdapter, ReadinessInfo, WorkloadRef, WorkloadSpec,
};
use crate::error::{AdmissionError, OrchestratorError, Result};
use crate::repository::{DeploymentUpdate, Failure};

/// Statuses a deployment execution can fail from; the requested statuses
/// cover a first write-ahead transition that errored
const RUNNING: [DeploymentStatus; 4] = [
    DeploymentStatus::Pending,
    DeploymentStatus::Applying,
    DeploymentStatus::RollbackRequested,
    DeploymentStatus::RollingBack,
];

/// What an execution applies; the pipeline's configuration supplies the
/// container port and probe path
#[derive(Debug, Clone)]
struct WorkloadContext {
    deployment: Deployment,
    port: u16,
    health_path: String,
}

impl WorkloadContext {
    fn workload(&self) -> WorkloadRef {
        workload_of(&self.deployment)
    }

    fn spec(&self, image: &str) -> WorkloadSpec {
        let d = &self.deployment;
        WorkloadSpec::new(
            self.workload(),
            image,
            d.replicas,
            self.port,
            &self.health_path,
            &d.service_name,
        )
        .with_ingress_host(d.ingress_host.clone())
        .with_label("ferry.environment", &d.environment)
        .with_label("ferry.deployment-id", d.id.to_string())
    }
}

struct StageFailure {
    stage: Stage,
    error: OrchestratorError,
}

fn at(stage: Stage) -> impl Fn(OrchestratorError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

fn workload_of(deployment: &Deployment) -> WorkloadRef {
    WorkloadRef {
        name: deployment.workload_name(),
        namespace: deployment.namespace.clone(),
    }
}

pub struct DeploymentOrchestrator {
    runtime: Runtime,
    cluster: Arc<dyn ClusterAdapter>,
}

impl DeploymentOrchestrator {
    pub fn new(runtime: Runtime, cluster: Arc<dyn ClusterAdapter>) -> Self {
        Self { runtime, cluster }
    }

    /// Admits a deployment of a successful build and starts applying it
    pub async fn deploy(self: &Arc<Self>, request: CreateDeployment) -> Result<Deployment> {
        let environment = request.environment.trim().to_string();
        let service_name = request.service_name.trim().to_string();

        check_name("environment", &environment)?;
        check_name("service name", &service_name)?;

        let namespace = match request.namespace.trim() {
            "" => self.runtime.config.default_namespace.clone(),
            namespace => {
                check_name("namespace", namespace)?;
                namespace.to_string()
            }
        };

        let replicas = match request.replicas {
            r if r < 0 => {
                return Err(OrchestratorError::Validation(format!(
                    "replicas must not be negative, got {}",
                    r
                )));
            }
            0 => 1,
            r => r,
        };

        let ingress_host = request
            .ingress_host
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let store = &self.runtime.store;
        let build = store
            .get_build(request.build_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("build", request.build_id))?;

        if build.status != BuildStatus::Success {
            return Err(OrchestratorError::Validation(format!(
                "build {} is {}; only successful builds can be deployed",
                build.id, build.status
            )));
        }

        let image = build.image().ok_or_else(|| {
            OrchestratorError::Internal(format!("successful build {} has no image", build.id))
        })?;

        let (port, health_path) = self.probe_settings(&build).await?;

        let busy = store
            .list_deployments_by_build(build.id)
            .await?
            .into_iter()
            .any(|d| d.environment == environment && !d.status.is_terminal());
        if busy {
            return Err(AdmissionError::Busy(format!(
                "build {} already has a deployment in progress for '{}'",
                build.id, environment
            ))
            .into());
        }

        let deployment = Deployment::new(
            build.id,
            environment,
            replicas,
            namespace,
            service_name,
            ingress_host,
            image.to_string(),
        );
        store.insert_deployment(&deployment).await?;

        tracing::info!(
            "Deployment {} created: build {} to {} ({} replicas in {})",
            deployment.id,
            build.id,
            deployment.environment,
            deployment.replicas,
            deployment.namespace
        );

        let ctx = WorkloadContext {
            deployment: deployment.clone(),
            port,
            health_path,
        };
        self.start(ctx, Execution::Apply);

        Ok(deployment)
    }

    /// Requests a rollback of a `success` deployment
    pub async fn rollback(self: &Arc<Self>, deployment_id: Uuid) -> Result<Deployment> {
        let deployment = self.require_active(deployment_id).await?;
        let build = self.build_of(&deployment).await?;
        let (port, health_path) = self.probe_settings(&build).await?;

        let requested = self
            .transition_or_reject(
                deployment_id,
                DeploymentStatus::Success,
                DeploymentUpdate::to(DeploymentStatus::RollbackRequested),
            )
            .await?;

        tracing::info!("Rollback of deployment {} requested", deployment_id);

        let ctx = WorkloadContext {
            deployment: requested.clone(),
            port,
            health_path,
        };
        self.start(ctx, Execution::Rollback { build });

        Ok(requested)
    }

    /// Settles a `pending` or `applying` deployment as `cancelled`
    pub async fn cancel(&self, deployment_id: Uuid) -> Result<Deployment> {
        let store = &self.runtime.store;
        let deployment = self.require(deployment_id).await?;

        let cancellable = [DeploymentStatus::Pending, DeploymentStatus::Applying];
        if !cancellable.contains(&deployment.status) {
            return Err(wrong_state(&deployment, "pending or applying"));
        }

        let Some(cancelled) = store
            .transition_deployment(
                deployment_id,
                &cancellable,
                DeploymentUpdate::to(DeploymentStatus::Cancelled),
            )
            .await?
        else {
            let current = self.require(deployment_id).await?;
            return Err(wrong_state(&current, "pending or applying"));
        };

        if let Some(log) = self.runtime.logs.get(deployment_id) {
            log.warn("Deployment cancelled");
        }
        let signalled = self.runtime.executions.cancel(deployment_id);

        tracing::info!(
            "Deployment {} cancelled (run signalled: {})",
            deployment_id,
            signalled
        );
        Ok(cancelled)
    }

    /// Changes the replica count of a `success` deployment
    pub async fn scale(&self, deployment_id: Uuid, replicas: i32) -> Result<Deployment> {
        if replicas < 0 {
            return Err(OrchestratorError::Validation(format!(
                "replicas must not be negative, got {}",
                replicas
            )));
        }

        let deployment = self.require_active(deployment_id).await?;
        let credentials = self.cluster_credentials(&deployment).await?;
        let workload = workload_of(&deployment);
        let cancel = CancelSignal::new();

        guarded(
            Stage::Apply,
            self.runtime.config.budgets.apply,
            &cancel,
            self.cluster.scale(&workload, replicas, &credentials, &cancel),
        )
        .await?;

        let scaled = self
            .transition_or_reject(
                deployment_id,
                DeploymentStatus::Success,
                DeploymentUpdate::to(DeploymentStatus::Success).with_replicas(replicas),
            )
            .await?;

        self.note(
            deployment_id,
            format!("Scaled from {} to {} replicas", deployment.replicas, replicas),
        )
        .await;
        tracing::info!("Deployment {} scaled to {} replicas", deployment_id, replicas);
        Ok(scaled)
    }

    /// Removes the workload of a `success` deployment from the cluster
    ///
    /// The record is kept; it only gains a `removed_at` timestamp.
    pub async fn teardown(&self, deployment_id: Uuid) -> Result<Deployment> {
        let deployment = self.require_active(deployment_id).await?;
        let credentials = self.cluster_credentials(&deployment).await?;
        let workload = workload_of(&deployment);
        let cancel = CancelSignal::new();

        guarded(
            Stage::Apply,
            self.runtime.config.budgets.apply,
            &cancel,
            self.cluster.delete(&workload, &credentials, &cancel),
        )
        .await?;

        let removed = self
            .transition_or_reject(
                deployment_id,
                DeploymentStatus::Success,
                DeploymentUpdate::to(DeploymentStatus::Success).removed(),
            )
            .await?;

        self.note(deployment_id, format!("Workload {} removed", workload.name))
            .await;
        tracing::info!("Deployment {} torn down", deployment_id);
        Ok(removed)
    }

    /// Recent output of the deployment's running workload
    pub async fn workload_logs(&self, deployment_id: Uuid, tail: i64) -> Result<String> {
        if tail <= 0 {
            return Err(OrchestratorError::Validation(
                "tail must be a positive number of lines".to_string(),
            ));
        }

        let deployment = self.require(deployment_id).await?;
        if deployment.removed_at.is_some() {
            return Err(wrong_state(&deployment, "a deployed workload"));
        }

        let credentials = self.cluster_credentials(&deployment).await?;
        let workload = workload_of(&deployment);
        let cancel = CancelSignal::new();

        let logs = guarded(
            Stage::Apply,
            self.runtime.config.budgets.apply,
            &cancel,
            self.cluster.get_logs(&workload, tail, &credentials, &cancel),
        )
        .await?;
        Ok(logs)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn start(self: &Arc<Self>, ctx: WorkloadContext, execution: Execution) -> JoinHandle<()> {
        let cancel = self.runtime.executions.register(ctx.deployment.id);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute(ctx, execution, cancel).await })
    }

    async fn execute(self: Arc<Self>, ctx: WorkloadContext, execution: Execution, cancel: CancelSignal) {
        let deployment_id = ctx.deployment.id;
        let log = self.runtime.logs.open(deployment_id);

        let steps = {
            let this = Arc::clone(&self);
            let log = Arc::clone(&log);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                match execution {
                    Execution::Apply => this.apply(&ctx, &log, &cancel).await,
                    Execution::Rollback { build } => {
                        this.roll_back(&ctx, &build, &log, &cancel).await
                    }
                }
            })
        };

        match steps.await {
            Ok(Ok(Some(deployment))) => {
                tracing::info!(
                    "Deployment {} is running {} in {}",
                    deployment_id,
                    deployment.image,
                    deployment.environment
                );
                log.info(format!("Deployment succeeded: {}", deployment.image));
            }
            Ok(Ok(None)) => {
                tracing::info!("Deployment {} was settled elsewhere, run stopped", deployment_id);
                log.warn("Deployment was settled elsewhere, stopping");
            }
            Ok(Err(failure)) => {
                self.settle_failure(deployment_id, failure, &log, &cancel)
                    .await
            }
            Err(join_error) => {
                tracing::error!("Deployment {} task aborted: {}", deployment_id, join_error);
                let failure = StageFailure {
                    stage: Stage::Apply,
                    error: OrchestratorError::Internal("deployment task panicked".to_string()),
                };
                self.settle_failure(deployment_id, failure, &log, &cancel)
                    .await;
            }
        }

        self.runtime.logs.close(&log).await;
        self.runtime.executions.unregister(deployment_id, &cancel);
    }

    async fn apply(
        &self,
        ctx: &WorkloadContext,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> std::result::Result<Option<Deployment>, StageFailure> {
        let store = &self.runtime.store;
        let config = &self.runtime.config;
        let deployment = &ctx.deployment;

        if store
            .transition_deployment(
                deployment.id,
                &[DeploymentStatus::Pending],
                DeploymentUpdate::to(DeploymentStatus::Applying),
            )
            .await
            .map_err(|e| at(Stage::Apply)(e.into()))?
            .is_none()
        {
            return Ok(None);
        }

        log.info(format!(
            "Deploying {} to '{}' ({} replicas in namespace {})",
            deployment.image, deployment.environment, deployment.replicas, deployment.namespace
        ));

        let credentials = self
            .cluster_credentials(deployment)
            .await
            .map_err(at(Stage::Apply))?;
        let spec = ctx.spec(&deployment.image);

        {
            let cluster = self.cluster.as_ref();
            let spec = &spec;
            let credentials = &credentials;
            with_retry(
                Stage::Apply,
                config.budgets.apply,
                config.retry_backoff,
                cancel,
                log,
                move || cluster.apply(spec, credentials, log, cancel),
            )
            .await
            .map_err(at(Stage::Apply))?;
        }
        self.flush(log).await;

        self.await_ready(&ctx.workload(), &credentials, log, cancel)
            .await
            .map_err(at(Stage::Readiness))?;

        store
            .transition_deployment(
                deployment.id,
                &[DeploymentStatus::Applying],
                DeploymentUpdate::to(DeploymentStatus::Success),
            )
            .await
            .map_err(|e| at(Stage::Readiness)(e.into()))
    }

    async fn roll_back(
        &self,
        ctx: &WorkloadContext,
        build: &Build,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> std::result::Result<Option<Deployment>, StageFailure> {
        let store = &self.runtime.store;
        let config = &self.runtime.config;
        let deployment = &ctx.deployment;

        if store
            .transition_deployment(
                deployment.id,
                &[DeploymentStatus::RollbackRequested],
                DeploymentUpdate::to(DeploymentStatus::RollingBack),
            )
            .await
            .map_err(|e| at(Stage::Rollback)(e.into()))?
            .is_none()
        {
            return Ok(None);
        }

        let credentials = self
            .cluster_credentials(deployment)
            .await
            .map_err(at(Stage::Rollback))?;
        let workload = ctx.workload();

        let fallback_image = if self.cluster.supports_revision_history() {
            log.info(format!(
                "Rolling back {} to its previous revision",
                workload.name
            ));
            guarded(
                Stage::Rollback,
                config.budgets.apply,
                cancel,
                self.cluster.rollback(&workload, &credentials, log, cancel),
            )
            .await
            .map_err(at(Stage::Rollback))?;
            None
        } else {
            let previous = self
                .previous_image(deployment, build)
                .await
                .map_err(at(Stage::Rollback))?;
            log.info(format!("Re-applying previous image {}", previous));

            let cluster = self.cluster.as_ref();
            let spec = ctx.spec(&previous);
            let spec = &spec;
            let credentials = &credentials;
            with_retry(
                Stage::Rollback,
                config.budgets.apply,
                config.retry_backoff,
                cancel,
                log,
                move || cluster.apply(spec, credentials, log, cancel),
            )
            .await
            .map_err(at(Stage::Rollback))?;
            Some(previous)
        };
        self.flush(log).await;

        let info = self
            .await_ready(&workload, &credentials, log, cancel)
            .await
            .map_err(at(Stage::Readiness))?;

        let mut update = DeploymentUpdate::to(DeploymentStatus::Success).rolled_back();
        if let Some(image) = info.image.or(fallback_image) {
            update = update.with_image(image);
        }

        store
            .transition_deployment(deployment.id, &[DeploymentStatus::RollingBack], update)
            .await
            .map_err(|e| at(Stage::Readiness)(e.into()))
    }

    /// Polls the workload until it is ready, within the readiness budget
    async fn await_ready(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> Result<ReadinessInfo> {
        let config = &self.runtime.config;
        let cluster = self.cluster.as_ref();

        let wait = async {
            let mut last: Option<ReadinessInfo> = None;
            loop {
                match cluster.get_status(workload, credentials, cancel).await {
                    Ok(info) if info.is_ready() => {
                        log.info(format!(
                            "{} ready: {}/{} replicas available",
                            workload.name, info.available, info.desired
                        ));
                        return Ok(info);
                    }
                    Ok(info) => {
                        if last.as_ref() != Some(&info) {
                            log.info(format!(
                                "Waiting for {}: {}/{} ready, {} updated, {} available",
                                workload.name, info.ready, info.desired, info.updated, info.available
                            ));
                        }
                        last = Some(info);
                    }
                    // The workload may not be visible yet right after an apply
                    Err(e)
                        if e.kind == AdapterErrorKind::Transient
                            || e.kind == AdapterErrorKind::NotFound =>
                    {
                        log.debug(format!("Status of {} unavailable: {}", workload.name, e));
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(config.readiness_poll).await;
            }
        };

        guarded(Stage::Readiness, config.budgets.readiness, cancel, wait).await
    }

    /// Image of the most recent earlier deployment of the same pipeline that
    /// reached `success` in the same environment, namespace and service
    async fn previous_image(&self, deployment: &Deployment, build: &Build) -> Result<String> {
        let store = &self.runtime.store;
        let mut newest: Option<Deployment> = None;

        for earlier in store.list_builds_by_pipeline(build.pipeline_id).await? {
            if earlier.id == build.id {
                continue;
            }
            for candidate in store.list_deployments_by_build(earlier.id).await? {
                let same_target = candidate.environment == deployment.environment
                    && candidate.namespace == deployment.namespace
                    && candidate.service_name == deployment.service_name;
                if !same_target
                    || candidate.status != DeploymentStatus::Success
                    || candidate.created_at >= deployment.created_at
                    || candidate.image == deployment.image
                {
                    continue;
                }
                if newest
                    .as_ref()
                    .is_none_or(|n| candidate.created_at > n.created_at)
                {
                    newest = Some(candidate);
                }
            }
        }

        newest
            .map(|d| d.image)
            .ok_or_else(|| OrchestratorError::Adapter {
                stage: Stage::Rollback,
                source: AdapterError::not_found(format!(
                    "no earlier successful deployment of {} to '{}' to roll back to",
                    deployment.service_name, deployment.environment
                )),
            })
    }

    async fn settle_failure(
        &self,
        deployment_id: Uuid,
        failure: StageFailure,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) {
        if cancel.is_cancelled() || is_cancellation(&failure.error) {
            log.warn(format!("Deployment stopped during {}", failure.stage));
            return;
        }

        let message = truncate_message(&failure.error.to_string(), MAX_ERROR_SUMMARY);
        log.error(&message);

        let update = DeploymentUpdate::to(DeploymentStatus::Failed).with_failure(Failure {
            stage: failure.stage,
            kind: failure.error.failure_kind(),
            message: message.clone(),
        });

        for attempt in 0..2 {
            match self
                .runtime
                .store
                .transition_deployment(deployment_id, &RUNNING, update.clone())
                .await
            {
                Ok(Some(_)) => {
                    tracing::info!("Deployment {} failed: {}", deployment_id, message);
                    return;
                }
                Ok(None) => {
                    tracing::debug!("Deployment {} was already settled", deployment_id);
                    return;
                }
                Err(e) if attempt == 0 => {
                    tracing::warn!(
                        "Recording failure of deployment {} failed, retrying: {}",
                        deployment_id,
                        e
                    );
                    tokio::time::sleep(self.runtime.config.retry_backoff).await;
                }
                Err(e) => tracing::error!(
                    "Failed to record failure of deployment {}: {}",
                    deployment_id,
                    e
                ),
            }
        }
    }

    // =========================================================================
    // Helper Functions
    // =========================================================================

    async fn require(&self, deployment_id: Uuid) -> Result<Deployment> {
        self.runtime
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("deployment", deployment_id))
    }

    /// A `success` deployment whose workload still exists
    async fn require_active(&self, deployment_id: Uuid) -> Result<Deployment> {
        let deployment = self.require(deployment_id).await?;

        if deployment.removed_at.is_some() {
            return Err(AdmissionError::WrongState {
                entity: "deployment",
                id: deployment_id,
                actual: "torn down".to_string(),
                expected: "success",
            }
            .into());
        }
        if deployment.status != DeploymentStatus::Success {
            return Err(wrong_state(&deployment, "success"));
        }
        Ok(deployment)
    }

    /// Applies a single-status compare-and-set, reporting the current status
    /// when it does not hold
    async fn transition_or_reject(
        &self,
        deployment_id: Uuid,
        from: DeploymentStatus,
        update: DeploymentUpdate,
    ) -> Result<Deployment> {
        match self
            .runtime
            .store
            .transition_deployment(deployment_id, &[from], update)
            .await?
        {
            Some(deployment) => Ok(deployment),
            None => {
                let current = self.require(deployment_id).await?;
                Err(wrong_state(&current, from.as_str()))
            }
        }
    }

    async fn build_of(&self, deployment: &Deployment) -> Result<Build> {
        self.runtime
            .store
            .get_build(deployment.build_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("build", deployment.build_id))
    }

    /// Container port and health path from the build's pipeline configuration
    async fn probe_settings(&self, build: &Build) -> Result<(u16, String)> {
        let pipeline = self
            .runtime
            .store
            .get_pipeline(build.pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("pipeline", build.pipeline_id))?;

        let config = BuildConfig::parse(&pipeline.config).map_err(OrchestratorError::Validation)?;
        Ok((config.port, config.health_path))
    }

    async fn cluster_credentials(&self, deployment: &Deployment) -> Result<ClusterCredentials> {
        self.runtime
            .credentials
            .cluster(&deployment.environment)
            .await
    }

    /// Appends a line to a deployment's log outside of any execution
    async fn note(&self, deployment_id: Uuid, message: String) {
        let log = self.runtime.logs.open(deployment_id);
        log.info(message);
        self.runtime.logs.close(&log).await;
    }

    async fn flush(&self, log: &ExecutionLog) {
        if let Err(e) = self.runtime.logs.flush(log).await {
            tracing::warn!(
                "Failed to flush logs of deployment {}: {}",
                log.execution_id(),
                e
            );
        }
    }
}

enum Execution {
    Apply,
    /// Rollback of a deployment of `build`
    Rollback { build: Build },
}

fn check_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "{} cannot be empty",
            field
        )));
    }
    if !is_dns_label(value) {
        return Err(OrchestratorError::Validation(format!(
            "{} '{}' must be a lowercase DNS label (a-z, 0-9, '-', at most 63 characters)",
            field, value
        )));
    }
    Ok(())
}

fn wrong_state(deployment: &Deployment, expected: &'static str) -> OrchestratorError {
    AdmissionError::WrongState {
        entity: "deployment",
        id: deployment.id,
        actual: deployment.status.to_string(),
        expected,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, wait_for_build, wait_for_deployment};
    use ferry_core::domain::build::BuildSource;
    use ferry_core::domain::failure::FailureKind;
    use ferry_core::domain::git_ref::GitRef;
    use std::time::Duration;

    fn request(build_id: Uuid, environment: &str, replicas: i32) -> CreateDeployment {
        CreateDeployment {
            build_id,
            environment: environment.to_string(),
            replicas,
            namespace: "ns1".to_string(),
            service_name: "svc1".to_string(),
            ingress_host: Some(String::new()),
        }
    }

    async fn successful_build(harness: &Harness) -> Build {
        let pipeline = harness.pipeline("P1", "").await;
        successful_build_of(harness, pipeline.id).await
    }

    async fn successful_build_of(harness: &Harness, pipeline_id: Uuid) -> Build {
        let build = harness
            .control
            .submit(pipeline_id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        let build = wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;
        build
    }

    #[tokio::test]
    async fn test_deploy_reaches_success() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;

        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 3))
            .await
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Pending);
        assert_eq!(deployment.ingress_host, None);

        let done =
            wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        assert_eq!(done.image, build.image().unwrap().to_string());

        let applied = harness.cluster.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].namespace, "ns1");
        assert_eq!(applied[0].replicas, 3);
        assert_eq!(applied[0].name, "svc1-prod");
        assert_eq!(applied[0].ingress_host, None);
    }

    #[tokio::test]
    async fn test_deploy_of_failed_build_is_rejected() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        harness
            .images
            .fail_build_with(AdapterError::invalid_input("bad Dockerfile"));

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Failed).await;

        let err = harness
            .control
            .deploy(request(build.id, "staging", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(harness.cluster.applied().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_validates_input() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;

        for bad in [
            request(build.id, "", 1),
            request(build.id, "Prod", 1),
            request(build.id, "prod", -1),
            CreateDeployment {
                service_name: " ".to_string(),
                ..request(build.id, "prod", 1)
            },
        ] {
            let err = harness.control.deploy(bad).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)), "{:?}", err);
        }

        let err = harness
            .control
            .deploy(request(Uuid::new_v4(), "prod", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_zero_replicas_and_empty_namespace_get_defaults() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;

        let deployment = harness
            .control
            .deploy(CreateDeployment {
                namespace: String::new(),
                ..request(build.id, "dev", 0)
            })
            .await
            .unwrap();

        assert_eq!(deployment.replicas, 1);
        assert_eq!(deployment.namespace, "default");
    }

    #[tokio::test]
    async fn test_second_deploy_to_busy_environment_is_rejected() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        let _gate = harness.cluster.hold_applies();

        harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();
        let err = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Admission(AdmissionError::Busy(_))
        ));

        // Another environment is independent
        harness
            .control
            .deploy(request(build.id, "staging", 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rollback_of_pending_deployment_is_rejected() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        let _gate = harness.cluster.hold_applies();

        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();

        let err = harness.control.rollback(deployment.id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Admission(AdmissionError::WrongState { .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_uses_revision_history() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 2))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        harness.settle().await;

        harness.cluster.set_rolled_back_image("registry.test/p1:older");
        let requested = harness.control.rollback(deployment.id).await.unwrap();
        assert_eq!(requested.status, DeploymentStatus::RollbackRequested);

        harness.settle().await;
        let done = harness.control.get_deployment(deployment.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::Success);
        assert_eq!(done.rollback_count, 1);
        assert_eq!(done.image, "registry.test/p1:older");
        assert_eq!(harness.cluster.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rollback_without_history_reapplies_previous_image() {
        let harness = Harness::without_revision_history();
        let pipeline = harness.pipeline("P1", "").await;
        let first = successful_build_of(&harness, pipeline.id).await;
        let second = successful_build_of(&harness, pipeline.id).await;

        let earlier = harness
            .control
            .deploy(request(first.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, earlier.id, DeploymentStatus::Success).await;
        harness.settle().await;

        let deployment = harness
            .control
            .deploy(request(second.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        harness.settle().await;

        harness.control.rollback(deployment.id).await.unwrap();
        harness.settle().await;

        let done = harness.control.get_deployment(deployment.id).await.unwrap();
        let previous = first.image().unwrap().to_string();
        assert_eq!(done.status, DeploymentStatus::Success);
        assert_eq!(done.image, previous);
        assert_eq!(harness.cluster.applied().last().unwrap().image, previous);
        assert_eq!(harness.cluster.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_rollback_ignores_images_that_never_ran_in_the_environment() {
        let harness = Harness::without_revision_history_with_config(|config| {
            config.budgets.readiness = Duration::from_millis(50);
        });
        let pipeline = harness.pipeline("P1", "").await;
        let never_deployed = successful_build_of(&harness, pipeline.id).await;
        let staged = successful_build_of(&harness, pipeline.id).await;
        let broken = successful_build_of(&harness, pipeline.id).await;
        let current = successful_build_of(&harness, pipeline.id).await;
        assert!(never_deployed.image().is_some());

        // Ran in staging only
        let staging = harness
            .control
            .deploy(request(staged.id, "staging", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, staging.id, DeploymentStatus::Success).await;
        harness.settle().await;

        // Reached prod but never became ready
        harness.cluster.never_ready();
        let failed = harness
            .control
            .deploy(request(broken.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, failed.id, DeploymentStatus::Failed).await;
        harness.settle().await;
        harness.cluster.ready_again();

        let deployment = harness
            .control
            .deploy(request(current.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        harness.settle().await;
        let applied = harness.cluster.applied().len();

        harness.control.rollback(deployment.id).await.unwrap();
        let done =
            wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Rollback));
        assert_eq!(done.failure_kind, Some(FailureKind::NotFound));
        assert_eq!(harness.cluster.applied().len(), applied);
    }

    #[tokio::test]
    async fn test_store_error_on_first_transition_fails_the_deployment() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        harness.fail_transitions(1);

        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();

        let done =
            wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Apply));
        assert_eq!(done.failure_kind, Some(FailureKind::Internal));
        assert!(harness.cluster.applied().is_empty());
        harness.settle().await;

        // The environment accepts a new deployment of the same build
        let retried = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, retried.id, DeploymentStatus::Success).await;
    }

    #[tokio::test]
    async fn test_rollback_without_earlier_build_fails() {
        let harness = Harness::without_revision_history();
        let build = successful_build(&harness).await;
        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        harness.settle().await;

        harness.control.rollback(deployment.id).await.unwrap();
        let done =
            wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Rollback));
        assert_eq!(done.failure_kind, Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_readiness_timeout_fails_deployment() {
        let harness = Harness::with_config(|config| {
            config.budgets.readiness = Duration::from_millis(50);
        });
        harness.cluster.never_ready();
        let build = successful_build(&harness).await;

        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();

        let done =
            wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Failed).await;
        assert_eq!(done.failed_stage, Some(Stage::Readiness));
        assert_eq!(done.failure_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_while_applying() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        let _gate = harness.cluster.hold_applies();

        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Applying).await;

        let cancelled = harness
            .control
            .cancel_deployment(deployment.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, DeploymentStatus::Cancelled);

        harness.settle().await;
        let after = harness.control.get_deployment(deployment.id).await.unwrap();
        assert_eq!(after.status, DeploymentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_scale_and_teardown() {
        let harness = Harness::new();
        let build = successful_build(&harness).await;
        let deployment = harness
            .control
            .deploy(request(build.id, "prod", 1))
            .await
            .unwrap();
        wait_for_deployment(&harness.store, deployment.id, DeploymentStatus::Success).await;
        harness.settle().await;

        let scaled = harness.control.scale(deployment.id, 4).await.unwrap();
        assert_eq!(scaled.replicas, 4);
        assert_eq!(harness.cluster.scaled(), vec![("svc1-prod".to_string(), 4)]);

        let logs = harness.control.workload_logs(deployment.id, 10).await.unwrap();
        assert!(logs.logs.contains("svc1-prod"));

        let removed = harness.control.teardown(deployment.id).await.unwrap();
        assert!(removed.removed_at.is_some());
        assert_eq!(harness.cluster.deleted(), vec!["svc1-prod".to_string()]);

        let err = harness.control.rollback(deployment.id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Admission(AdmissionError::WrongState { .. })
        ));
        let err = harness.control.scale(deployment.id, 2).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Admission(_)));
    }

    #[tokio::test]
    async fn test_pipeline_deploy_targets_are_deployed_after_success() {
        let harness = Harness::new();
        let pipeline = harness
            .pipeline(
                "P1",
                r#"{"deploy": [{"environment": "staging", "replicas": 2, "service_name": "web"}]}"#,
            )
            .await;

        let build = harness
            .control
            .submit(pipeline.id, GitRef::Branch("main".into()), BuildSource::Manual, None)
            .await
            .unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;

        let deployments = harness.control.list_deployments(build.id).await.unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].environment, "staging");
        assert_eq!(deployments[0].status, DeploymentStatus::Success);
        assert_eq!(harness.cluster.applied()[0].replicas, 2);
    }
}
