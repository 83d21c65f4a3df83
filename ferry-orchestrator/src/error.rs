//! Orchestrator error taxonomy
//!
//! Every synchronous operation of the control plane returns
//! [`OrchestratorError`]. Failures of an execution that is already running are
//! never surfaced this way; they are persisted on the build or deployment
//! record instead.

use std::time::Duration;

use ferry_core::domain::failure::{FailureKind, Stage};
use ferry_core::domain::git_ref::GitRef;
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterErrorKind};
use crate::repository::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Bad input, never retried
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// A webhook delivery failed authentication
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{stage} failed: {source}")]
    Adapter {
        stage: Stage,
        #[source]
        source: AdapterError,
    },

    #[error("{stage} exceeded its budget of {}s", .budget.as_secs())]
    Timeout { stage: Stage, budget: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Concurrency and state conflicts
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("busy: {0}")]
    Busy(String),

    #[error("pipeline {0} is disabled")]
    PipelineDisabled(Uuid),

    #[error("no active {kind} trigger of pipeline {pipeline_id} matches {git_ref}")]
    NoMatchingTrigger {
        pipeline_id: Uuid,
        kind: &'static str,
        git_ref: GitRef,
    },

    #[error("{entity} {id} is {actual}, expected {expected}")]
    WrongState {
        entity: &'static str,
        id: Uuid,
        actual: String,
        expected: &'static str,
    },
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        OrchestratorError::NotFound { entity, id }
    }

    /// Classification persisted on a record that failed with this error
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            OrchestratorError::Adapter { source, .. } => source.kind.into(),
            OrchestratorError::Timeout { .. } => FailureKind::Timeout,
            OrchestratorError::Validation(_) => FailureKind::InvalidInput,
            OrchestratorError::NotFound { .. } => FailureKind::NotFound,
            OrchestratorError::Unauthorized(_) => FailureKind::AuthFailed,
            OrchestratorError::Admission(_) | OrchestratorError::Internal(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Whether a single retry of the stage is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Adapter { source, .. } if source.kind == AdapterErrorKind::Transient
        )
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => OrchestratorError::Admission(AdmissionError::Busy(msg)),
            StoreError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                OrchestratorError::Internal(format!("database error: {}", e))
            }
        }
    }
}

impl From<AdapterErrorKind> for FailureKind {
    fn from(kind: AdapterErrorKind) -> Self {
        match kind {
            AdapterErrorKind::NotFound => FailureKind::NotFound,
            AdapterErrorKind::AuthFailed => FailureKind::AuthFailed,
            AdapterErrorKind::Transient => FailureKind::Transient,
            AdapterErrorKind::InvalidInput => FailureKind::InvalidInput,
            AdapterErrorKind::Cancelled => FailureKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
