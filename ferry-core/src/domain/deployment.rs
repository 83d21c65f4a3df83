//! Deployment domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::{FailureKind, Stage};

/// One rollout of a build's image to an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub build_id: Uuid,
    pub environment: String,
    pub replicas: i32,
    pub namespace: String,
    pub service_name: String,
    pub ingress_host: Option<String>,
    /// Image currently applied to the workload
    pub image: String,
    pub status: DeploymentStatus,
    pub failed_stage: Option<Stage>,
    pub failure_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub rollback_count: i32,
    /// Set once the workload has been torn down
    pub removed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// New `pending` deployment of `image`
    pub fn new(
        build_id: Uuid,
        environment: impl Into<String>,
        replicas: i32,
        namespace: impl Into<String>,
        service_name: impl Into<String>,
        ingress_host: Option<String>,
        image: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            build_id,
            environment: environment.into(),
            replicas,
            namespace: namespace.into(),
            service_name: service_name.into(),
            ingress_host,
            image: image.into(),
            status: DeploymentStatus::Pending,
            failed_stage: None,
            failure_kind: None,
            error_message: None,
            rollback_count: 0,
            removed_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Name of the cluster workload backing this deployment
    pub fn workload_name(&self) -> String {
        format!("{}-{}", self.service_name, self.environment)
    }
}

/// Deployment execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Applying,
    Success,
    Failed,
    Cancelled,
    RollbackRequested,
    RollingBack,
}

impl DeploymentStatus {
    pub const NON_TERMINAL: [DeploymentStatus; 4] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Applying,
        DeploymentStatus::RollbackRequested,
        DeploymentStatus::RollingBack,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Applying, Success)
                | (Applying, Failed)
                | (Pending | Applying, Cancelled)
                | (Success, RollbackRequested)
                | (RollbackRequested, RollingBack)
                | (RollingBack, Success)
                | (RollingBack, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Applying => "applying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
            DeploymentStatus::RollbackRequested => "rollback_requested",
            DeploymentStatus::RollingBack => "rolling_back",
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "applying" => Ok(DeploymentStatus::Applying),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "cancelled" => Ok(DeploymentStatus::Cancelled),
            "rollback_requested" => Ok(DeploymentStatus::RollbackRequested),
            "rolling_back" => Ok(DeploymentStatus::RollingBack),
            other => Err(format!("unknown deployment status '{}'", other)),
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DNS-1123 label: lowercase alphanumerics and '-', at most 63 chars,
/// starting and ending with an alphanumeric
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}
