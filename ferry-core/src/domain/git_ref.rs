//! Source references

use serde::{Deserialize, Serialize};

/// A source reference a build is requested for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum GitRef {
    Branch(String),
    Tag(String),
    Commit(String),
}

impl GitRef {
    /// Parses a user- or provider-supplied ref
    ///
    /// `refs/heads/x` is a branch, `refs/tags/x` a tag, a full SHA-1 or
    /// SHA-256 hex digest a commit, and anything else a branch name.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();

        if input.is_empty() {
            return Err("ref cannot be empty".to_string());
        }

        let git_ref = if let Some(branch) = input.strip_prefix("refs/heads/") {
            GitRef::Branch(branch.to_string())
        } else if let Some(tag) = input.strip_prefix("refs/tags/") {
            GitRef::Tag(tag.to_string())
        } else if is_commit_hash(input) {
            GitRef::Commit(input.to_ascii_lowercase())
        } else {
            GitRef::Branch(input.to_string())
        };

        if git_ref.name().is_empty() {
            return Err(format!("ref '{}' has an empty name", input));
        }

        if git_ref.name().starts_with('-') || git_ref.name().contains("..") {
            return Err(format!("ref '{}' is not a valid git ref name", input));
        }

        Ok(git_ref)
    }

    /// Short name without the `refs/...` prefix
    pub fn name(&self) -> &str {
        match self {
            GitRef::Branch(name) | GitRef::Tag(name) | GitRef::Commit(name) => name,
        }
    }

    /// Storage discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            GitRef::Branch(_) => "branch",
            GitRef::Tag(_) => "tag",
            GitRef::Commit(_) => "commit",
        }
    }

    /// Rebuilds a ref from its storage discriminator and name
    pub fn from_parts(kind: &str, name: String) -> Option<Self> {
        match kind {
            "branch" => Some(GitRef::Branch(name)),
            "tag" => Some(GitRef::Tag(name)),
            "commit" => Some(GitRef::Commit(name)),
            _ => None,
        }
    }

    /// Refspec handed to `git fetch`
    pub fn refspec(&self) -> String {
        match self {
            GitRef::Branch(name) => format!("refs/heads/{}", name),
            GitRef::Tag(name) => format!("refs/tags/{}", name),
            GitRef::Commit(sha) => sha.clone(),
        }
    }
}

impl std::fmt::Display for GitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitRef::Commit(sha) => write!(f, "{}", sha),
            other => write!(f, "{}", other.refspec()),
        }
    }
}

fn is_commit_hash(input: &str) -> bool {
    (input.len() == 40 || input.len() == 64) && input.chars().all(|c| c.is_ascii_hexdigit())
}
