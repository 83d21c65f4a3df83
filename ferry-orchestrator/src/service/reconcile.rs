//! Reconciliation pass
//!
//! Settles executions abandoned by a crash or restart. Non-terminal builds
//! and deployments untouched for longer than the staleness window, and not
//! running in this process, become `failed` with kind `internal`. Working
//! copies in the workspace that belong to no running build are released.

use std::sync::Arc;

use chrono::Utc;
use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::failure::{FailureKind, Stage};
use uuid::Uuid;

use super::Runtime;
use crate::adapter::SourceAdapter;
use crate::error::Result;
use crate::repository::{BuildUpdate, DeploymentUpdate, Failure};

const INTERRUPTED: &str = "interrupted";

/// What one pass settled or released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub builds: usize,
    pub deployments: usize,
    pub working_copies: usize,
}

pub struct Reconciler {
    runtime: Runtime,
    source: Arc<dyn SourceAdapter>,
}

impl Reconciler {
    pub fn new(runtime: Runtime, source: Arc<dyn SourceAdapter>) -> Self {
        Self { runtime, source }
    }

    /// Runs a pass now and then every `reconcile_interval`
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.runtime.config.reconcile_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.reconcile_once().await {
                Ok(report) if report != ReconcileReport::default() => {
                    tracing::info!(
                        "Reconciliation settled {} builds and {} deployments, released {} working copies",
                        report.builds,
                        report.deployments,
                        report.working_copies
                    );
                }
                Ok(_) => tracing::debug!("Reconciliation found nothing to do"),
                Err(e) => tracing::error!("Reconciliation failed: {}", e),
            }
        }
    }

    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        Ok(ReconcileReport {
            builds: self.settle_builds().await?,
            deployments: self.settle_deployments().await?,
            working_copies: self.release_orphans().await,
        })
    }

    async fn settle_builds(&self) -> Result<usize> {
        let store = &self.runtime.store;
        let cutoff = self.cutoff();
        let mut settled = 0;

        for build in store.list_builds_by_status(&BuildStatus::NON_TERMINAL).await? {
            if build.updated_at >= cutoff || self.runtime.executions.is_running(build.id) {
                continue;
            }

            let update = BuildUpdate::to(BuildStatus::Failed).with_failure(Failure {
                stage: build_stage(&build),
                kind: FailureKind::Internal,
                message: INTERRUPTED.to_string(),
            });

            if store
                .transition_build(build.id, &[build.status], update)
                .await?
                .is_some()
            {
                tracing::warn!(
                    "Build {} abandoned while {}, marked failed",
                    build.id,
                    build.status
                );
                settled += 1;
            }
        }

        Ok(settled)
    }

    async fn settle_deployments(&self) -> Result<usize> {
        let store = &self.runtime.store;
        let cutoff = self.cutoff();
        let mut settled = 0;

        for deployment in store
            .list_deployments_by_status(&DeploymentStatus::NON_TERMINAL)
            .await?
        {
            if deployment.updated_at >= cutoff
                || self.runtime.executions.is_running(deployment.id)
            {
                continue;
            }

            let update = DeploymentUpdate::to(DeploymentStatus::Failed).with_failure(Failure {
                stage: deployment_stage(&deployment),
                kind: FailureKind::Internal,
                message: INTERRUPTED.to_string(),
            });

            if store
                .transition_deployment(deployment.id, &[deployment.status], update)
                .await?
                .is_some()
            {
                tracing::warn!(
                    "Deployment {} abandoned while {}, marked failed",
                    deployment.id,
                    deployment.status
                );
                settled += 1;
            }
        }

        Ok(settled)
    }

    /// Releases `build-<id>` directories of builds not running here
    async fn release_orphans(&self) -> usize {
        let workspace = &self.runtime.config.workspace_dir;
        let mut entries = match tokio::fs::read_dir(workspace).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!("Cannot list workspace {}: {}", workspace.display(), e);
                return 0;
            }
        };

        let mut released = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Cannot read workspace entry: {}", e);
                    break;
                }
            };

            let name = entry.file_name();
            let Some(build_id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("build-"))
                .and_then(|id| Uuid::parse_str(id).ok())
            else {
                continue;
            };
            // Checked per entry: a build started during the scan registers
            // before its working copy is created
            if self.runtime.executions.is_running(build_id) {
                continue;
            }

            match self.source.release(&entry.path()).await {
                Ok(()) => {
                    tracing::info!("Released orphaned working copy of build {}", build_id);
                    released += 1;
                }
                Err(e) => tracing::warn!(
                    "Failed to release working copy of build {}: {}",
                    build_id,
                    e
                ),
            }
        }

        released
    }

    fn cutoff(&self) -> chrono::DateTime<Utc> {
        let stale_after = chrono::Duration::from_std(self.runtime.config.stale_after())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Utc::now() - stale_after
    }
}

fn build_stage(build: &Build) -> Stage {
    match build.status {
        BuildStatus::Building => Stage::Build,
        BuildStatus::Pushing => Stage::Push,
        _ => Stage::Clone,
    }
}

fn deployment_stage(deployment: &Deployment) -> Stage {
    match deployment.status {
        DeploymentStatus::RollbackRequested | DeploymentStatus::RollingBack => Stage::Rollback,
        _ => Stage::Apply,
    }
}
