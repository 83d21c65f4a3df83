//! Webhook DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::git_ref::GitRef;

/// Provider-independent form of a source-control event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Normalized `host/owner/repo`
    pub repository: String,
    pub git_ref: GitRef,
    pub commit: Option<String>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    TagPush,
}

/// What happened to one pipeline when an event was dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub pipeline_id: Uuid,
    /// Set when a build was accepted
    pub build_id: Option<Uuid>,
    /// Set when the pipeline rejected the event
    pub rejected: Option<String>,
}

/// Response to a delivered webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookReceipt {
    /// Reason the delivery was acknowledged without dispatching
    pub ignored: Option<String>,
    pub outcomes: Vec<DispatchOutcome>,
}
