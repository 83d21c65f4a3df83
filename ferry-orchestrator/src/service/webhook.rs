//! Webhook decoders
//!
//! Turn a provider's push delivery into a [`NormalizedEvent`] after checking
//! that it really came from the provider. GitHub deliveries carry an
//! HMAC-SHA256 of the body in `X-Hub-Signature-256`; GitLab deliveries echo a
//! shared token in `X-Gitlab-Token`.

use axum::http::HeaderMap;
use ferry_core::domain::git_ref::GitRef;
use ferry_core::domain::project::normalize_repository;
use ferry_core::dto::webhook::{EventKind, NormalizedEvent};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::credentials::Secret;
use crate::config::Config;

type HmacSha256 = Hmac<Sha256>;

const NULL_COMMIT: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("webhook signature or token is missing or does not match")]
    InvalidSignature,

    /// A genuine delivery that does not start builds
    #[error("ignored: {0}")]
    Ignored(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub trait WebhookDecoder: Send + Sync {
    fn decode(&self, headers: &HeaderMap, payload: &[u8]) -> Result<NormalizedEvent, DecodeError>;
}

/// Decoder for a provider path segment such as `github`
pub fn decoder_for(provider: &str, config: &Config) -> Result<Box<dyn WebhookDecoder>, DecodeError> {
    match provider {
        "github" => Ok(Box::new(GitHubDecoder::new(
            config.github_webhook_secret.clone().map(Secret::new),
        ))),
        "gitlab" => Ok(Box::new(GitLabDecoder::new(
            config.gitlab_webhook_token.clone().map(Secret::new),
        ))),
        other => Err(DecodeError::Unsupported(format!(
            "webhook provider '{}'",
            other
        ))),
    }
}

// =============================================================================
// GitHub
// =============================================================================

pub struct GitHubDecoder {
    secret: Option<Secret>,
}

#[derive(Deserialize)]
struct GitHubPush {
    #[serde(rename = "ref")]
    git_ref: String,
    after: Option<String>,
    #[serde(default)]
    deleted: bool,
    repository: GitHubRepository,
}

#[derive(Deserialize)]
struct GitHubRepository {
    clone_url: Option<String>,
    html_url: Option<String>,
}

impl GitHubDecoder {
    pub fn new(secret: Option<Secret>) -> Self {
        Self { secret }
    }

    fn verify(&self, headers: &HeaderMap, payload: &[u8]) -> Result<(), DecodeError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };

        let signature = header(headers, "x-hub-signature-256")
            .and_then(|value| value.strip_prefix("sha256="))
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(DecodeError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.expose().as_bytes())
            .map_err(|_| DecodeError::InvalidSignature)?;
        mac.update(payload);
        mac.verify_slice(&signature)
            .map_err(|_| DecodeError::InvalidSignature)
    }
}

impl WebhookDecoder for GitHubDecoder {
    fn decode(&self, headers: &HeaderMap, payload: &[u8]) -> Result<NormalizedEvent, DecodeError> {
        self.verify(headers, payload)?;

        let event = header(headers, "x-github-event")
            .ok_or_else(|| DecodeError::Malformed("missing X-GitHub-Event header".to_string()))?;
        match event {
            "push" => {}
            "ping" => return Err(DecodeError::Ignored("ping".to_string())),
            other => return Err(DecodeError::Ignored(format!("{} event", other))),
        }

        let push: GitHubPush = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let commit = push.after.filter(|sha| sha != NULL_COMMIT);
        if push.deleted || commit.is_none() {
            return Err(DecodeError::Ignored(format!("deletion of {}", push.git_ref)));
        }

        let url = push
            .repository
            .clone_url
            .or(push.repository.html_url)
            .ok_or_else(|| DecodeError::Malformed("repository has no URL".to_string()))?;

        normalized(&url, &push.git_ref, commit)
    }
}

// =============================================================================
// GitLab
// =============================================================================

pub struct GitLabDecoder {
    token: Option<Secret>,
}

#[derive(Deserialize)]
struct GitLabPush {
    #[serde(rename = "ref")]
    git_ref: String,
    checkout_sha: Option<String>,
    project: GitLabProject,
}

#[derive(Deserialize)]
struct GitLabProject {
    git_http_url: Option<String>,
    web_url: Option<String>,
}

impl GitLabDecoder {
    pub fn new(token: Option<Secret>) -> Self {
        Self { token }
    }

    fn verify(&self, headers: &HeaderMap) -> Result<(), DecodeError> {
        let Some(token) = &self.token else {
            return Ok(());
        };

        match header(headers, "x-gitlab-token") {
            Some(given) if token_matches(given.as_bytes(), token) => Ok(()),
            _ => Err(DecodeError::InvalidSignature),
        }
    }
}

impl WebhookDecoder for GitLabDecoder {
    fn decode(&self, headers: &HeaderMap, payload: &[u8]) -> Result<NormalizedEvent, DecodeError> {
        self.verify(headers)?;

        let event = header(headers, "x-gitlab-event")
            .ok_or_else(|| DecodeError::Malformed("missing X-Gitlab-Event header".to_string()))?;
        if event != "Push Hook" && event != "Tag Push Hook" {
            return Err(DecodeError::Ignored(event.to_string()));
        }

        let push: GitLabPush = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let commit = push.checkout_sha.filter(|sha| sha != NULL_COMMIT);
        if commit.is_none() {
            return Err(DecodeError::Ignored(format!("deletion of {}", push.git_ref)));
        }

        let url = push
            .project
            .git_http_url
            .or(push.project.web_url)
            .ok_or_else(|| DecodeError::Malformed("project has no URL".to_string()))?;

        normalized(&url, &push.git_ref, commit)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn normalized(url: &str, raw_ref: &str, commit: Option<String>) -> Result<NormalizedEvent, DecodeError> {
    let git_ref = GitRef::parse(raw_ref).map_err(DecodeError::Malformed)?;
    let kind = match git_ref {
        GitRef::Tag(_) => EventKind::TagPush,
        _ => EventKind::Push,
    };

    Ok(NormalizedEvent {
        repository: normalize_repository(url),
        git_ref,
        commit: commit.map(|sha| sha.to_ascii_lowercase()),
        kind,
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Compares fixed-length HMAC tags of both tokens, keyed by the expected
/// one, in constant time; a length mismatch is not observable
fn token_matches(given: &[u8], expected: &Secret) -> bool {
    let key = expected.expose().as_bytes();
    let (Ok(mut presented), Ok(mut configured)) = (
        HmacSha256::new_from_slice(key),
        HmacSha256::new_from_slice(key),
    ) else {
        return false;
    };

    presented.update(given);
    configured.update(key);
    presented
        .verify_slice(&configured.finalize().into_bytes())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SHA: &str = "9fceb02d0ae598e95dc970b74767f19372d61af8";

    fn github_push(git_ref: &str, after: &str) -> Vec<u8> {
        serde_json::json!({
            "ref": git_ref,
            "after": after,
            "deleted": after == NULL_COMMIT,
            "repository": {"clone_url": "https://github.com/Acme/Web.git"}
        })
        .to_string()
        .into_bytes()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_github_signed_push_decodes() {
        let decoder = GitHubDecoder::new(Some(Secret::new("s3cret")));
        let payload = github_push("refs/heads/main", SHA);
        let signature = sign("s3cret", &payload);

        let event = decoder
            .decode(
                &headers(&[
                    ("x-github-event", "push"),
                    ("x-hub-signature-256", &signature),
                ]),
                &payload,
            )
            .unwrap();

        assert_eq!(event.repository, "github.com/acme/web");
        assert_eq!(event.git_ref, GitRef::Branch("main".to_string()));
        assert_eq!(event.commit.as_deref(), Some(SHA));
        assert_eq!(event.kind, EventKind::Push);
    }

    #[test]
    fn test_github_bad_or_missing_signature_is_rejected() {
        let decoder = GitHubDecoder::new(Some(Secret::new("s3cret")));
        let payload = github_push("refs/heads/main", SHA);
        let forged = sign("other", &payload);

        let err = decoder
            .decode(
                &headers(&[("x-github-event", "push"), ("x-hub-signature-256", &forged)]),
                &payload,
            )
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidSignature);

        let err = decoder
            .decode(&headers(&[("x-github-event", "push")]), &payload)
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidSignature);
    }

    #[test]
    fn test_github_ping_and_deletions_are_ignored() {
        let decoder = GitHubDecoder::new(None);

        let err = decoder
            .decode(&headers(&[("x-github-event", "ping")]), b"{}")
            .unwrap_err();
        assert!(matches!(err, DecodeError::Ignored(_)));

        let err = decoder
            .decode(
                &headers(&[("x-github-event", "push")]),
                &github_push("refs/heads/old", NULL_COMMIT),
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::Ignored(_)));
    }

    #[test]
    fn test_github_tag_push() {
        let decoder = GitHubDecoder::new(None);
        let event = decoder
            .decode(
                &headers(&[("x-github-event", "push")]),
                &github_push("refs/tags/v1.0.0", SHA),
            )
            .unwrap();
        assert_eq!(event.kind, EventKind::TagPush);
        assert_eq!(event.git_ref, GitRef::Tag("v1.0.0".to_string()));
    }

    #[test]
    fn test_gitlab_token_and_tag_push() {
        let decoder = GitLabDecoder::new(Some(Secret::new("tok")));
        let payload = serde_json::json!({
            "ref": "refs/tags/v2",
            "checkout_sha": SHA,
            "project": {"git_http_url": "https://gitlab.example.com/group/app.git"}
        })
        .to_string()
        .into_bytes();

        let err = decoder
            .decode(
                &headers(&[("x-gitlab-event", "Tag Push Hook"), ("x-gitlab-token", "nope")]),
                &payload,
            )
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidSignature);

        let event = decoder
            .decode(
                &headers(&[("x-gitlab-event", "Tag Push Hook"), ("x-gitlab-token", "tok")]),
                &payload,
            )
            .unwrap();
        assert_eq!(event.repository, "gitlab.example.com/group/app");
        assert_eq!(event.kind, EventKind::TagPush);
    }

    #[test]
    fn test_malformed_payload_and_unknown_provider() {
        let decoder = GitLabDecoder::new(None);
        let err = decoder
            .decode(&headers(&[("x-gitlab-event", "Push Hook")]), b"not json")
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        assert!(matches!(
            decoder_for("bitbucket", &Config::default()),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_token_comparison() {
        let token = Secret::new("gl-token-123");
        assert!(token_matches(b"gl-token-123", &token));
        assert!(!token_matches(b"gl-token-12", &token));
        assert!(!token_matches(b"gl-token-1234", &token));
        assert!(!token_matches(b"", &token));
        assert!(!token_matches(b"GL-TOKEN-123", &token));
    }
}
