//! Project domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A source repository whose pipelines Ferry runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub git_url: String,
    pub git_provider: String,
    /// Normalized `host/owner/repo`, used to route webhook events
    pub repository: String,
    pub created_at: DateTime<Utc>,
}

/// Normalizes a clone URL or repository path to `host/owner/repo`
///
/// Accepts `https://`, `ssh://` and scp-like `git@host:owner/repo.git` forms.
/// Hosts and paths are lowercased and trailing `.git` or `/` are dropped so
/// that the clone URL stored on a project and the URL a provider reports in a
/// webhook compare equal.
pub fn normalize_repository(url: &str) -> String {
    let mut rest = url.trim();

    if let Some((_, after_scheme)) = rest.split_once("://") {
        rest = after_scheme;
    } else if let Some((user_host, path)) = rest.split_once(':') {
        // scp-like syntax: git@github.com:owner/repo.git
        if !user_host.contains('/') {
            let host = user_host.rsplit('@').next().unwrap_or(user_host);
            return finish(format!("{}/{}", host, path));
        }
    }

    // Strip credentials
    if let Some((userinfo, after)) = rest.split_once('@') {
        if !userinfo.contains('/') {
            rest = after;
        }
    }

    finish(rest.to_string())
}

fn finish(raw: String) -> String {
    let lowered = raw.to_ascii_lowercase();
    let trimmed = lowered.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    // Drop explicit default ports
    let (host, path) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    let host = host
        .strip_suffix(":443")
        .or_else(|| host.strip_suffix(":22"))
        .unwrap_or(host);

    if path.is_empty() {
        host.to_string()
    } else {
        format!("{}/{}", host, path)
    }
}
