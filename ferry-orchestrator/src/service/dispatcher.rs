//! Trigger Dispatcher
//!
//! Admits builds. A submission is checked against the pipeline, its
//! triggers and the one-active-build rule, persisted as `pending` and handed
//! to the [`BuildOrchestrator`] on its own task. Nothing is ever queued: a
//! busy pipeline rejects the submission.

use std::sync::Arc;

use ferry_core::domain::build::{Build, BuildSource};
use ferry_core::domain::git_ref::GitRef;
use ferry_core::domain::pipeline::{BuildConfig, Pipeline};
use ferry_core::domain::trigger::TriggerKind;
use ferry_core::dto::webhook::{DispatchOutcome, NormalizedEvent};
use uuid::Uuid;

use super::Runtime;
use super::build::{BuildContext, BuildOrchestrator};
use crate::error::{AdmissionError, OrchestratorError, Result};

pub struct Dispatcher {
    runtime: Runtime,
    builds: Arc<BuildOrchestrator>,
}

impl Dispatcher {
    pub fn new(runtime: Runtime, builds: Arc<BuildOrchestrator>) -> Self {
        Self { runtime, builds }
    }

    /// Admits a build of `git_ref` and starts it
    ///
    /// Returns the `pending` snapshot as soon as the build is persisted.
    pub async fn submit(
        &self,
        pipeline_id: Uuid,
        git_ref: GitRef,
        source: BuildSource,
        requested_commit: Option<String>,
    ) -> Result<Build> {
        let store = &self.runtime.store;

        let pipeline = store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("pipeline", pipeline_id))?;

        if !pipeline.enabled {
            return Err(AdmissionError::PipelineDisabled(pipeline_id).into());
        }

        let config = BuildConfig::parse(&pipeline.config).map_err(OrchestratorError::Validation)?;

        if source != BuildSource::Manual {
            self.require_trigger(&pipeline, &git_ref, source).await?;
        }

        let busy = store
            .list_builds_by_pipeline(pipeline_id)
            .await?
            .into_iter()
            .find(|b| !b.status.is_terminal());
        if let Some(active) = busy {
            return Err(AdmissionError::Busy(format!(
                "pipeline {} already has build {} {}",
                pipeline_id, active.id, active.status
            ))
            .into());
        }

        let project = store
            .get_project(pipeline.project_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("project", pipeline.project_id))?;

        // A lost race with another submission surfaces here as Busy
        let build = Build::new(pipeline_id, git_ref, source, requested_commit);
        store.insert_build(&build).await?;

        tracing::info!(
            "Build {} accepted: pipeline {} at {} ({})",
            build.id,
            pipeline.name,
            build.source_ref,
            source.as_str()
        );

        self.builds.start(BuildContext {
            build: build.clone(),
            pipeline,
            project,
            config,
        });

        Ok(build)
    }

    /// Submits a webhook build to every enabled pipeline of the event's
    /// repository that has a matching webhook trigger
    pub async fn dispatch_event(&self, event: &NormalizedEvent) -> Result<Vec<DispatchOutcome>> {
        let store = &self.runtime.store;
        let mut outcomes = Vec::new();

        let projects = store.find_projects_by_repository(&event.repository).await?;
        if projects.is_empty() {
            tracing::debug!("No project for repository {}", event.repository);
        }

        for project in projects {
            let pipelines = store.list_pipelines_by_project(project.id).await?;

            for pipeline in pipelines.into_iter().filter(|p| p.enabled) {
                let submitted = self
                    .submit(
                        pipeline.id,
                        event.git_ref.clone(),
                        BuildSource::Webhook,
                        event.commit.clone(),
                    )
                    .await;

                match submitted {
                    Ok(build) => outcomes.push(DispatchOutcome {
                        pipeline_id: pipeline.id,
                        build_id: Some(build.id),
                        rejected: None,
                    }),
                    Err(OrchestratorError::Admission(AdmissionError::NoMatchingTrigger {
                        ..
                    })) => {
                        tracing::debug!(
                            "Pipeline {} has no webhook trigger for {}",
                            pipeline.id,
                            event.git_ref
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Webhook build of pipeline {} rejected: {}",
                            pipeline.id,
                            e
                        );
                        outcomes.push(DispatchOutcome {
                            pipeline_id: pipeline.id,
                            build_id: None,
                            rejected: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        Ok(outcomes)
    }

    async fn require_trigger(
        &self,
        pipeline: &Pipeline,
        git_ref: &GitRef,
        source: BuildSource,
    ) -> Result<()> {
        let kind = TriggerKind::for_source(source);
        let triggers = self.runtime.store.list_triggers(pipeline.id).await?;

        if triggers
            .iter()
            .any(|t| t.kind == kind && t.matches(git_ref))
        {
            return Ok(());
        }

        Err(AdmissionError::NoMatchingTrigger {
            pipeline_id: pipeline.id,
            kind: kind.as_str(),
            git_ref: git_ref.clone(),
        }
        .into())
    }
}
