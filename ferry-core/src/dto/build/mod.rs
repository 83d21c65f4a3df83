//! Build DTOs

use serde::{Deserialize, Serialize};

/// Request to run a pipeline manually
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPipeline {
    /// `refs/heads/x`, `refs/tags/x`, a full commit hash or a branch name
    #[serde(rename = "ref")]
    pub git_ref: String,
}
