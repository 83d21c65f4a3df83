//! Pipeline, project and trigger DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::trigger::TriggerKind;

/// Request to register a source repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub git_url: String,
    /// `github`, `gitlab` or `generic`
    #[serde(default = "default_provider")]
    pub git_provider: String,
}

fn default_provider() -> String {
    "generic".to_string()
}

/// Request to create a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub project_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Build configuration JSON; empty for defaults
    #[serde(default)]
    pub config: String,
}

/// Request to add a trigger to a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrigger {
    pub kind: TriggerKind,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Request to enable or disable a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPipelineEnabled {
    pub enabled: bool,
}
