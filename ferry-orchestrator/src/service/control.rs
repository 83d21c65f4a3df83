//! Control plane
//!
//! The one entry point the HTTP surface talks to. Wires the orchestrators
//! together over a shared [`Runtime`] and answers status and log queries.

use std::sync::Arc;

use axum::http::HeaderMap;
use ferry_core::domain::build::{Build, BuildSource};
use ferry_core::domain::deployment::Deployment;
use ferry_core::domain::git_ref::GitRef;
use ferry_core::domain::log::LogEntry;
use ferry_core::dto::deployment::{CreateDeployment, WorkloadLogs};
use ferry_core::dto::webhook::WebhookReceipt;
use uuid::Uuid;

use super::Runtime;
use super::build::BuildOrchestrator;
use super::deployment::DeploymentOrchestrator;
use super::dispatcher::Dispatcher;
use super::reconcile::Reconciler;
use super::schedule::ScheduleTicker;
use super::webhook::{DecodeError, decoder_for};
use crate::adapter::{ClusterAdapter, ImageBuilder, SourceAdapter};
use crate::error::{OrchestratorError, Result};

#[derive(Clone)]
pub struct ControlPlane {
    runtime: Runtime,
    dispatcher: Arc<Dispatcher>,
    builds: Arc<BuildOrchestrator>,
    deployments: Arc<DeploymentOrchestrator>,
}

impl ControlPlane {
    pub fn new(
        runtime: Runtime,
        source: Arc<dyn SourceAdapter>,
        images: Arc<dyn ImageBuilder>,
        cluster: Arc<dyn ClusterAdapter>,
    ) -> Self {
        let deployments = Arc::new(DeploymentOrchestrator::new(runtime.clone(), cluster));
        let builds = Arc::new(BuildOrchestrator::new(
            runtime.clone(),
            source,
            images,
            Arc::clone(&deployments),
        ));
        let dispatcher = Arc::new(Dispatcher::new(runtime.clone(), Arc::clone(&builds)));

        Self {
            runtime,
            dispatcher,
            builds,
            deployments,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.runtime.clone(), Arc::clone(self.builds.source()))
    }

    pub fn schedule_ticker(&self) -> ScheduleTicker {
        ScheduleTicker::new(
            Arc::clone(&self.runtime.store),
            self.dispatcher(),
            self.runtime.config.schedule_interval,
        )
    }

    // =========================================================================
    // Builds
    // =========================================================================

    pub async fn submit(
        &self,
        pipeline_id: Uuid,
        git_ref: GitRef,
        source: BuildSource,
        requested_commit: Option<String>,
    ) -> Result<Build> {
        self.dispatcher
            .submit(pipeline_id, git_ref, source, requested_commit)
            .await
    }

    /// Manual run of `raw_ref`, parsed as a branch, tag or commit
    pub async fn run_pipeline(&self, pipeline_id: Uuid, raw_ref: &str) -> Result<Build> {
        let git_ref = GitRef::parse(raw_ref).map_err(OrchestratorError::Validation)?;
        let requested_commit = match &git_ref {
            GitRef::Commit(sha) => Some(sha.clone()),
            _ => None,
        };
        self.submit(pipeline_id, git_ref, BuildSource::Manual, requested_commit)
            .await
    }

    pub async fn get_build(&self, id: Uuid) -> Result<Build> {
        self.runtime
            .store
            .get_build(id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("build", id))
    }

    pub async fn get_build_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        self.get_build(id).await?;
        Ok(self.runtime.logs.read(id).await?)
    }

    pub async fn cancel_build(&self, id: Uuid) -> Result<Build> {
        self.builds.cancel(id).await
    }

    /// Builds of a pipeline, newest first
    pub async fn list_builds(&self, pipeline_id: Uuid) -> Result<Vec<Build>> {
        self.runtime
            .store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("pipeline", pipeline_id))?;
        Ok(self.runtime.store.list_builds_by_pipeline(pipeline_id).await?)
    }

    /// Deployments of a build, newest first
    pub async fn list_deployments(&self, build_id: Uuid) -> Result<Vec<Deployment>> {
        self.get_build(build_id).await?;
        Ok(self.runtime.store.list_deployments_by_build(build_id).await?)
    }

    // =========================================================================
    // Deployments
    // =========================================================================

    pub async fn deploy(&self, request: CreateDeployment) -> Result<Deployment> {
        self.deployments.deploy(request).await
    }

    pub async fn get_deployment(&self, id: Uuid) -> Result<Deployment> {
        self.runtime
            .store
            .get_deployment(id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("deployment", id))
    }

    pub async fn get_deployment_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        self.get_deployment(id).await?;
        Ok(self.runtime.logs.read(id).await?)
    }

    pub async fn cancel_deployment(&self, id: Uuid) -> Result<Deployment> {
        self.deployments.cancel(id).await
    }

    pub async fn rollback(&self, id: Uuid) -> Result<Deployment> {
        self.deployments.rollback(id).await
    }

    pub async fn scale(&self, id: Uuid, replicas: i32) -> Result<Deployment> {
        self.deployments.scale(id, replicas).await
    }

    pub async fn teardown(&self, id: Uuid) -> Result<Deployment> {
        self.deployments.teardown(id).await
    }

    pub async fn workload_logs(&self, id: Uuid, tail: i64) -> Result<WorkloadLogs> {
        let logs = self.deployments.workload_logs(id, tail).await?;
        Ok(WorkloadLogs {
            deployment_id: id,
            tail,
            logs,
        })
    }

    // =========================================================================
    // Webhooks
    // =========================================================================

    /// Verifies and decodes a provider delivery, then dispatches it
    ///
    /// Deliveries the provider sends but that start nothing (pings, branch
    /// deletions, other event types) are acknowledged with a reason.
    pub async fn handle_webhook(
        &self,
        provider: &str,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookReceipt> {
        let decoded = decoder_for(provider, &self.runtime.config)
            .and_then(|decoder| decoder.decode(headers, payload));

        let event = match decoded {
            Ok(event) => event,
            Err(DecodeError::Ignored(reason)) => {
                tracing::debug!("{} webhook ignored: {}", provider, reason);
                return Ok(WebhookReceipt {
                    ignored: Some(reason),
                    outcomes: Vec::new(),
                });
            }
            Err(DecodeError::InvalidSignature) => {
                tracing::warn!("{} webhook rejected: invalid signature", provider);
                return Err(OrchestratorError::Unauthorized(
                    DecodeError::InvalidSignature.to_string(),
                ));
            }
            Err(e) => return Err(OrchestratorError::Validation(e.to_string())),
        };

        tracing::info!(
            "{} webhook: {} on {}",
            provider,
            event.git_ref,
            event.repository
        );

        let outcomes = self.dispatcher.dispatch_event(&event).await?;
        Ok(WebhookReceipt {
            ignored: None,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, wait_for_build};
    use axum::http::HeaderValue;
    use ferry_core::domain::build::BuildStatus;
    use ferry_core::domain::trigger::TriggerKind;

    fn push_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", HeaderValue::from_static("push"));
        headers
    }

    #[tokio::test]
    async fn test_run_pipeline_parses_refs() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;

        let err = harness.control.run_pipeline(pipeline.id, "  ").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let sha = "a".repeat(40);
        let build = harness.control.run_pipeline(pipeline.id, &sha).await.unwrap();
        assert_eq!(build.source_ref, GitRef::Commit(sha.clone()));
        assert_eq!(build.requested_commit, Some(sha));
    }

    #[tokio::test]
    async fn test_build_logs_are_readable_during_and_after_the_run() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("P1", "").await;
        let gate = harness.images.hold_builds();

        let build = harness.control.run_pipeline(pipeline.id, "main").await.unwrap();
        wait_for_build(&harness.store, build.id, BuildStatus::Building).await;

        let live = harness.control.get_build_logs(build.id).await.unwrap();
        assert!(!live.is_empty());

        gate.notify_one();
        wait_for_build(&harness.store, build.id, BuildStatus::Success).await;
        harness.settle().await;

        let persisted = harness.control.get_build_logs(build.id).await.unwrap();
        assert!(persisted.len() >= live.len());

        let err = harness.control.get_build_logs(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_webhook_push_starts_a_build() {
        let harness = Harness::new();
        let pipeline = harness.pipeline("web", "").await;
        harness
            .trigger(pipeline.id, TriggerKind::Webhook, Some("main"), None)
            .await;

        let payload = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "b".repeat(40),
            "repository": {"clone_url": harness.git_url()}
        })
        .to_string();

        let receipt = harness
            .control
            .handle_webhook("github", &push_headers(), payload.as_bytes())
            .await
            .unwrap();

        assert!(receipt.ignored.is_none());
        assert_eq!(receipt.outcomes.len(), 1);
        assert!(receipt.outcomes[0].build_id.is_some());
    }

    #[tokio::test]
    async fn test_webhook_errors_map_to_orchestrator_errors() {
        let harness = Harness::with_config(|config| {
            config.github_webhook_secret = Some("s3cret".to_string());
        });

        let err = harness
            .control
            .handle_webhook("github", &push_headers(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized(_)));

        let err = harness
            .control
            .handle_webhook("bitbucket", &push_headers(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let mut ping = HeaderMap::new();
        ping.insert("x-gitlab-event", HeaderValue::from_static("Issue Hook"));
        let receipt = harness
            .control
            .handle_webhook("gitlab", &ping, b"{}")
            .await
            .unwrap();
        assert!(receipt.ignored.is_some());
    }
}
