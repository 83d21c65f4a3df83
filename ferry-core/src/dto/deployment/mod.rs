//! Deployment DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to deploy a successful build to an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeployment {
    pub build_id: Uuid,
    pub environment: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub namespace: String,
    pub service_name: String,
    #[serde(default)]
    pub ingress_host: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

/// Request to change the replica count of a running deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleDeployment {
    pub replicas: i32,
}

/// Recent output of a deployment's workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadLogs {
    pub deployment_id: Uuid,
    pub tail: i64,
    pub logs: String,
}
