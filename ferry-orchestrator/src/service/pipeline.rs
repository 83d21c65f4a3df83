//! Pipeline Service
//!
//! Business logic for project, pipeline and trigger administration.

use std::str::FromStr;

use chrono::Utc;
use ferry_core::domain::pipeline::{BuildConfig, Pipeline};
use ferry_core::domain::project::{Project, normalize_repository};
use ferry_core::domain::trigger::{Trigger, TriggerKind};
use ferry_core::dto::pipeline::{CreatePipeline, CreateProject, CreateTrigger};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::repository::Store;

const GIT_PROVIDERS: [&str; 3] = ["github", "gitlab", "generic"];

/// Register a source repository
pub async fn create_project(store: &dyn Store, req: CreateProject) -> Result<Project> {
    validate_project_request(&req)?;

    let project = Project {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        repository: normalize_repository(&req.git_url),
        git_url: req.git_url.trim().to_string(),
        git_provider: req.git_provider,
        created_at: Utc::now(),
    };
    store.insert_project(&project).await?;

    tracing::info!(
        "Project created: {} ({}) for {}",
        project.name,
        project.id,
        project.repository
    );

    Ok(project)
}

/// Create a new pipeline
pub async fn create_pipeline(store: &dyn Store, req: CreatePipeline) -> Result<Pipeline> {
    validate_pipeline_request(&req)?;

    store
        .get_project(req.project_id)
        .await?
        .ok_or_else(|| OrchestratorError::not_found("project", req.project_id))?;

    let now = Utc::now();
    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        project_id: req.project_id,
        name: req.name.trim().to_string(),
        description: req.description,
        config: req.config,
        enabled: true,
        created_at: now,
        updated_at: now,
    };
    store.insert_pipeline(&pipeline).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    Ok(pipeline)
}

/// Get a pipeline by ID
pub async fn get_pipeline(store: &dyn Store, id: Uuid) -> Result<Pipeline> {
    store
        .get_pipeline(id)
        .await?
        .ok_or_else(|| OrchestratorError::not_found("pipeline", id))
}

/// Enable or disable a pipeline; running builds are unaffected
pub async fn set_enabled(store: &dyn Store, id: Uuid, enabled: bool) -> Result<Pipeline> {
    let pipeline = store
        .set_pipeline_enabled(id, enabled)
        .await?
        .ok_or_else(|| OrchestratorError::not_found("pipeline", id))?;

    tracing::info!(
        "Pipeline {} {}",
        id,
        if enabled { "enabled" } else { "disabled" }
    );

    Ok(pipeline)
}

/// Add an active trigger to a pipeline
pub async fn create_trigger(
    store: &dyn Store,
    pipeline_id: Uuid,
    req: CreateTrigger,
) -> Result<Trigger> {
    get_pipeline(store, pipeline_id).await?;

    let trigger = Trigger {
        id: Uuid::new_v4(),
        pipeline_id,
        kind: req.kind,
        branch: non_empty(req.branch),
        tag: non_empty(req.tag),
        schedule: non_empty(req.schedule),
        active: true,
        created_at: Utc::now(),
    };
    validate_trigger(&trigger)?;

    store.insert_trigger(&trigger).await?;

    tracing::info!(
        "Trigger {} ({}) added to pipeline {}",
        trigger.id,
        trigger.kind.as_str(),
        pipeline_id
    );

    Ok(trigger)
}

/// Triggers of a pipeline, oldest first
pub async fn list_triggers(store: &dyn Store, pipeline_id: Uuid) -> Result<Vec<Trigger>> {
    get_pipeline(store, pipeline_id).await?;
    Ok(store.list_triggers(pipeline_id).await?)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_project_request(req: &CreateProject) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Project name cannot be empty".to_string(),
        ));
    }

    if req.git_url.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Project git_url cannot be empty".to_string(),
        ));
    }

    if !GIT_PROVIDERS.contains(&req.git_provider.as_str()) {
        return Err(OrchestratorError::Validation(format!(
            "Unknown git provider '{}' (expected one of: {})",
            req.git_provider,
            GIT_PROVIDERS.join(", ")
        )));
    }

    Ok(())
}

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Pipeline name cannot be empty".to_string(),
        ));
    }

    if req.name.len() > 255 {
        return Err(OrchestratorError::Validation(
            "Pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    BuildConfig::parse(&req.config).map_err(OrchestratorError::Validation)?;

    Ok(())
}

fn validate_trigger(trigger: &Trigger) -> Result<()> {
    match trigger.kind {
        TriggerKind::Schedule => {
            let Some(expression) = &trigger.schedule else {
                return Err(OrchestratorError::Validation(
                    "Schedule triggers need a cron expression".to_string(),
                ));
            };

            cron::Schedule::from_str(expression).map_err(|e| {
                OrchestratorError::Validation(format!(
                    "Invalid cron expression '{}': {}",
                    expression, e
                ))
            })?;

            if trigger.scheduled_ref().is_none() {
                return Err(OrchestratorError::Validation(
                    "Schedule triggers need a concrete branch or tag to build".to_string(),
                ));
            }
        }
        TriggerKind::Webhook | TriggerKind::Manual => {
            if trigger.schedule.is_some() {
                return Err(OrchestratorError::Validation(format!(
                    "Only schedule triggers take a cron expression, not {} triggers",
                    trigger.kind.as_str()
                )));
            }
        }
    }

    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    fn trigger_request(kind: TriggerKind, branch: Option<&str>, schedule: Option<&str>) -> CreateTrigger {
        CreateTrigger {
            kind,
            branch: branch.map(String::from),
            tag: None,
            schedule: schedule.map(String::from),
        }
    }

    async fn pipeline(store: &MemoryStore) -> Pipeline {
        let project = create_project(
            store,
            CreateProject {
                name: "web".to_string(),
                git_url: "git@github.com:Acme/Web.git".to_string(),
                git_provider: "github".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(project.repository, "github.com/acme/web");

        create_pipeline(
            store,
            CreatePipeline {
                project_id: project.id,
                name: "build".to_string(),
                description: None,
                config: String::new(),
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_validate_empty_name() {
        let req = CreatePipeline {
            project_id: Uuid::new_v4(),
            name: "  ".to_string(),
            description: None,
            config: String::new(),
        };

        let result = validate_pipeline_request(&req);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_validate_build_configuration() {
        let req = CreatePipeline {
            project_id: Uuid::new_v4(),
            name: "build".to_string(),
            description: None,
            config: r#"{"context": "../outside"}"#.to_string(),
        };

        let result = validate_pipeline_request(&req);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let req = CreateProject {
            name: "web".to_string(),
            git_url: "https://example.com/web.git".to_string(),
            git_provider: "svn".to_string(),
        };
        assert!(validate_project_request(&req).is_err());
    }

    #[tokio::test]
    async fn test_pipeline_needs_existing_project() {
        let store = MemoryStore::new();
        let err = create_pipeline(
            &store,
            CreatePipeline {
                project_id: Uuid::new_v4(),
                name: "build".to_string(),
                description: None,
                config: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_enable_toggle() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store).await;
        assert!(pipeline.enabled);

        let disabled = set_enabled(&store, pipeline.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(!get_pipeline(&store, pipeline.id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_schedule_trigger_validation() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store).await;

        for bad in [
            trigger_request(TriggerKind::Schedule, Some("main"), None),
            trigger_request(TriggerKind::Schedule, Some("main"), Some("every day")),
            trigger_request(TriggerKind::Schedule, Some("release/*"), Some("0 0 3 * * *")),
            trigger_request(TriggerKind::Webhook, Some("main"), Some("0 0 3 * * *")),
        ] {
            let err = create_trigger(&store, pipeline.id, bad).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)), "{}", err);
        }

        let nightly = create_trigger(
            &store,
            pipeline.id,
            trigger_request(TriggerKind::Schedule, Some("main"), Some("0 0 3 * * *")),
        )
        .await
        .unwrap();
        assert!(nightly.active);

        let listed = list_triggers(&store, pipeline.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, nightly.id);
    }

    #[tokio::test]
    async fn test_blank_patterns_are_dropped() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store).await;

        let trigger = create_trigger(
            &store,
            pipeline.id,
            trigger_request(TriggerKind::Webhook, Some(" "), None),
        )
        .await
        .unwrap();
        assert_eq!(trigger.branch, None);
    }
}
