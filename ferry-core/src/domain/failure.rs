//! Failure classification persisted on builds and deployments

use serde::{Deserialize, Serialize};

/// Execution stage an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clone,
    Build,
    Push,
    Apply,
    Readiness,
    Rollback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Build => "build",
            Stage::Push => "push",
            Stage::Apply => "apply",
            Stage::Readiness => "readiness",
            Stage::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clone" => Ok(Stage::Clone),
            "build" => Ok(Stage::Build),
            "push" => Ok(Stage::Push),
            "apply" => Ok(Stage::Apply),
            "readiness" => Ok(Stage::Readiness),
            "rollback" => Ok(Stage::Rollback),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    AuthFailed,
    Transient,
    InvalidInput,
    Timeout,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::AuthFailed => "auth_failed",
            FailureKind::Transient => "transient",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(FailureKind::NotFound),
            "auth_failed" => Ok(FailureKind::AuthFailed),
            "transient" => Ok(FailureKind::Transient),
            "invalid_input" => Ok(FailureKind::InvalidInput),
            "timeout" => Ok(FailureKind::Timeout),
            "cancelled" => Ok(FailureKind::Cancelled),
            "internal" => Ok(FailureKind::Internal),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum length of an error summary stored on a record
pub const MAX_ERROR_SUMMARY: usize = 1024;

/// Cuts a message to at most `max` bytes on a char boundary
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.len() <= max {
        return message.to_string();
    }

    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &message[..end])
}
