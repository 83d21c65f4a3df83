//! Build domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::{FailureKind, Stage};
use super::git_ref::GitRef;

/// One fetch + build + publish execution of a pipeline at a source ref
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub source_ref: GitRef,
    pub source: BuildSource,
    /// Commit reported by the triggering event, if any
    pub requested_commit: Option<String>,
    /// Commit the working copy was resolved to
    pub commit: Option<String>,
    pub status: BuildStatus,
    pub image_name: Option<String>,
    pub image_tag: Option<String>,
    pub failed_stage: Option<Stage>,
    pub failure_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    /// New `pending` build
    pub fn new(
        pipeline_id: Uuid,
        source_ref: GitRef,
        source: BuildSource,
        requested_commit: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            source_ref,
            source,
            requested_commit,
            commit: None,
            status: BuildStatus::Pending,
            image_name: None,
            image_tag: None,
            failed_stage: None,
            failure_kind: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Published image coordinates, once the build has produced them
    pub fn image(&self) -> Option<ImageRef> {
        match (&self.image_name, &self.image_tag) {
            (Some(name), Some(tag)) => Some(ImageRef {
                name: name.clone(),
                tag: tag.clone(),
            }),
            _ => None,
        }
    }

    /// Tag for this build's image
    ///
    /// Derived from the creation time and the build id so that it is stable
    /// across retries of a stage and unique across concurrent builds.
    pub fn derive_image_tag(&self) -> String {
        format!(
            "{}-{}",
            self.created_at.format("%Y%m%d-%H%M%S"),
            self.id.simple()
        )
    }
}

/// Build execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Cloning,
    Building,
    Pushing,
    Success,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub const NON_TERMINAL: [BuildStatus; 4] = [
        BuildStatus::Pending,
        BuildStatus::Cloning,
        BuildStatus::Building,
        BuildStatus::Pushing,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        matches!(
            (self, next),
            (Pending, Cloning)
                | (Cloning, Building)
                | (Building, Pushing)
                | (Pushing, Success)
                | (Cloning | Building | Pushing, Failed)
                | (Pending | Cloning | Building | Pushing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Cloning => "cloning",
            BuildStatus::Building => "building",
            BuildStatus::Pushing => "pushing",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "cloning" => Ok(BuildStatus::Cloning),
            "building" => Ok(BuildStatus::Building),
            "pushing" => Ok(BuildStatus::Pushing),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            "cancelled" => Ok(BuildStatus::Cancelled),
            other => Err(format!("unknown build status '{}'", other)),
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSource {
    Manual,
    Webhook,
    Schedule,
}

impl BuildSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSource::Manual => "manual",
            BuildSource::Webhook => "webhook",
            BuildSource::Schedule => "schedule",
        }
    }
}

impl std::str::FromStr for BuildSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(BuildSource::Manual),
            "webhook" => Ok(BuildSource::Webhook),
            "schedule" => Ok(BuildSource::Schedule),
            other => Err(format!("unknown build source '{}'", other)),
        }
    }
}

/// Fully qualified image name and tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
