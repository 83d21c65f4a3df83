//! Trigger domain types

use chrono::{DateTime, Utc};
use glob_match::glob_match;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::build::BuildSource;
use super::git_ref::GitRef;

/// A rule that starts builds of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub kind: TriggerKind,
    /// Glob over branch names
    pub branch: Option<String>,
    /// Glob over tag names
    pub tag: Option<String>,
    /// Cron expression, schedule triggers only
    pub schedule: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Webhook,
    Schedule,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Webhook => "webhook",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        }
    }

    /// Trigger kind that admits builds from a given source
    pub fn for_source(source: BuildSource) -> Self {
        match source {
            BuildSource::Manual => TriggerKind::Manual,
            BuildSource::Webhook => TriggerKind::Webhook,
            BuildSource::Schedule => TriggerKind::Schedule,
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(TriggerKind::Webhook),
            "schedule" => Ok(TriggerKind::Schedule),
            "manual" => Ok(TriggerKind::Manual),
            other => Err(format!("unknown trigger kind '{}'", other)),
        }
    }
}

impl Trigger {
    /// Whether this trigger admits a build of `git_ref`
    ///
    /// Branch refs match the branch glob, or any trigger with no pattern at
    /// all. Tag refs need an explicit tag glob. Bare commits only match
    /// pattern-less triggers.
    pub fn matches(&self, git_ref: &GitRef) -> bool {
        if !self.active {
            return false;
        }

        let unpatterned = self.branch.is_none() && self.tag.is_none();

        match git_ref {
            GitRef::Branch(name) => match &self.branch {
                Some(pattern) => glob_match(pattern, name),
                None => unpatterned,
            },
            GitRef::Tag(name) => self
                .tag
                .as_deref()
                .is_some_and(|pattern| glob_match(pattern, name)),
            GitRef::Commit(_) => unpatterned,
        }
    }

    /// The ref a schedule tick builds
    pub fn scheduled_ref(&self) -> Option<GitRef> {
        if let Some(branch) = self.branch.as_deref().filter(|b| !has_glob(b)) {
            return Some(GitRef::Branch(branch.to_string()));
        }
        if let Some(tag) = self.tag.as_deref().filter(|t| !has_glob(t)) {
            return Some(GitRef::Tag(tag.to_string()));
        }
        None
    }
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}
