//! Git source adapter
//!
//! Shallow-fetches a single ref or commit into a fresh directory with the
//! `git` CLI. Credentials are passed as an HTTP `Authorization` header through
//! `GIT_CONFIG_*` environment variables so they never appear in arguments,
//! remote URLs or `.git/config`.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use super::process::{self, ProcessSpec};
use super::{AdapterError, AdapterErrorKind, AdapterResult, SourceAdapter, SourceRequest, WorkingCopy};
use crate::service::cancel::CancelSignal;
use crate::service::credentials::BasicCredentials;
use crate::service::log_sink::ExecutionLog;

pub struct GitSource {
    program: String,
}

impl GitSource {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    fn git(&self, dest: &Path) -> ProcessSpec {
        ProcessSpec::new(&self.program)
            .current_dir(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
    }
}

impl Default for GitSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for GitSource {
    async fn acquire(
        &self,
        request: &SourceRequest,
        dest: &Path,
        credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<WorkingCopy> {
        if request.repo_url.trim().is_empty() {
            return Err(AdapterError::invalid_input("repository URL is empty"));
        }

        // A leftover directory from an earlier attempt would make `git init` reuse it
        self.release(dest).await?;
        tokio::fs::create_dir_all(dest).await.map_err(|e| {
            AdapterError::transient(format!("cannot create {}: {}", dest.display(), e))
        })?;

        let target = match &request.commit {
            Some(commit) => commit.clone(),
            None => request.git_ref.refspec(),
        };

        log.info(format!("Fetching {} from {}", target, request.repo_url));

        process::run(
            &self.git(dest).args(["init", "--quiet"]),
            None,
            cancel,
            classify_git_error,
        )
        .await?;

        process::run(
            &self
                .git(dest)
                .args(["remote", "add", "origin", request.repo_url.as_str()]),
            None,
            cancel,
            classify_git_error,
        )
        .await?;

        process::run(
            &self
                .git(dest)
                .envs(auth_env(credentials))
                .args(["fetch", "--depth", "1", "--no-tags", "origin"])
                .arg(target),
            Some(log),
            cancel,
            classify_git_error,
        )
        .await?;

        process::run(
            &self
                .git(dest)
                .args(["checkout", "--force", "--quiet", "FETCH_HEAD"]),
            Some(log),
            cancel,
            classify_git_error,
        )
        .await?;

        let output = process::run(
            &self.git(dest).args(["rev-parse", "HEAD"]),
            None,
            cancel,
            classify_git_error,
        )
        .await?;

        let commit = output.stdout.trim().to_string();
        if commit.is_empty() {
            return Err(AdapterError::not_found(format!(
                "{} resolved to no commit",
                request.git_ref
            )));
        }

        info!("Checked out {} at {} into {}", request.git_ref, commit, dest.display());
        log.info(format!("Checked out {} at {}", request.git_ref, commit));

        Ok(WorkingCopy {
            path: dest.to_path_buf(),
            commit,
        })
    }

    async fn release(&self, dest: &Path) -> AdapterResult<()> {
        match tokio::fs::remove_dir_all(dest).await {
            Ok(()) => {
                debug!("Removed working copy {}", dest.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::transient(format!(
                "cannot remove {}: {}",
                dest.display(),
                e
            ))),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Environment that makes git send basic auth on every HTTP request
fn auth_env(credentials: Option<&BasicCredentials>) -> Vec<(String, String)> {
    let Some(credentials) = credentials else {
        return Vec::new();
    };

    let token = STANDARD.encode(format!(
        "{}:{}",
        credentials.username,
        credentials.password.expose()
    ));

    vec![
        ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
        ("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()),
        (
            "GIT_CONFIG_VALUE_0".to_string(),
            format!("Authorization: Basic {}", token),
        ),
    ]
}

/// Classifies lowercased git stderr
pub fn classify_git_error(stderr: &str) -> AdapterErrorKind {
    const AUTH: &[&str] = &[
        "authentication failed",
        "could not read username",
        "could not read password",
        "permission denied",
        "the requested url returned error: 401",
        "the requested url returned error: 403",
        "terminal prompts disabled",
    ];
    const NOT_FOUND: &[&str] = &[
        "repository not found",
        "couldn't find remote ref",
        "does not appear to be a git repository",
        "the requested url returned error: 404",
        "not our ref",
        "no such remote ref",
        "unadvertised object",
        "invalid refspec",
    ];

    if AUTH.iter().any(|needle| stderr.contains(needle)) {
        AdapterErrorKind::AuthFailed
    } else if NOT_FOUND.iter().any(|needle| stderr.contains(needle)) {
        AdapterErrorKind::NotFound
    } else {
        AdapterErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::credentials::Secret;

    #[test]
    fn test_classify_git_errors() {
        assert_eq!(
            classify_git_error("fatal: authentication failed for 'https://git.local/a/b'"),
            AdapterErrorKind::AuthFailed
        );
        assert_eq!(
            classify_git_error("fatal: couldn't find remote ref refs/heads/nope"),
            AdapterErrorKind::NotFound
        );
        assert_eq!(
            classify_git_error("remote: repository not found."),
            AdapterErrorKind::NotFound
        );
        assert_eq!(
            classify_git_error("fatal: unable to access: could not resolve host: git.local"),
            AdapterErrorKind::Transient
        );
    }

    #[test]
    fn test_auth_env_carries_basic_header() {
        assert!(auth_env(None).is_empty());

        let creds = BasicCredentials {
            username: "bot".to_string(),
            password: Secret::new("s3cret"),
        };
        let env = auth_env(Some(&creds));

        assert!(env.contains(&("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string())));
        let header = &env
            .iter()
            .find(|(k, _)| k == "GIT_CONFIG_VALUE_0")
            .unwrap()
            .1;
        assert_eq!(
            header,
            &format!("Authorization: Basic {}", STANDARD.encode("bot:s3cret"))
        );
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected_before_any_call() {
        let source = GitSource::new();
        let dest = std::env::temp_dir().join(format!("ferry-src-{}", uuid::Uuid::new_v4()));
        let log = ExecutionLog::new(uuid::Uuid::new_v4(), 4096);
        let request = SourceRequest {
            repo_url: " ".to_string(),
            git_ref: ferry_core::domain::git_ref::GitRef::Branch("main".to_string()),
            commit: None,
        };

        let err = source
            .acquire(&request, &dest, None, &log, &CancelSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::InvalidInput);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let source = GitSource::new();
        let dest = std::env::temp_dir().join(format!("ferry-src-{}", uuid::Uuid::new_v4()));

        source.release(&dest).await.unwrap();

        tokio::fs::create_dir_all(dest.join("nested")).await.unwrap();
        source.release(&dest).await.unwrap();
        assert!(!dest.exists());
        source.release(&dest).await.unwrap();
    }
}
