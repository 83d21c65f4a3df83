//! Credential collaborator
//!
//! Resolves git and registry credentials per project and cluster credentials
//! per environment. Secrets are handed to a single adapter call and never
//! persisted or logged.

use async_trait::async_trait;
use ferry_core::domain::project::Project;

use crate::config::Config;
use crate::error::Result;

/// A secret value whose `Debug` output is redacted
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Username and password or token
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Secret,
}

/// How to reach the cluster an environment lives in
#[derive(Debug, Clone, Default)]
pub struct ClusterCredentials {
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn git(&self, project: &Project) -> Result<Option<BasicCredentials>>;
    async fn registry(&self, project: &Project) -> Result<Option<BasicCredentials>>;
    async fn cluster(&self, environment: &str) -> Result<ClusterCredentials>;
}

/// Credentials taken from the orchestrator configuration, shared by every
/// project and environment
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    git: Option<BasicCredentials>,
    registry: Option<BasicCredentials>,
    cluster: ClusterCredentials,
}

impl EnvCredentials {
    pub fn from_config(config: &Config) -> Self {
        Self {
            git: basic(&config.git_username, &config.git_password),
            registry: basic(&config.registry_username, &config.registry_password),
            cluster: ClusterCredentials {
                kubeconfig: config.kubeconfig.clone(),
                context: config.kube_context.clone(),
            },
        }
    }
}

fn basic(username: &Option<String>, password: &Option<String>) -> Option<BasicCredentials> {
    match (username, password) {
        (Some(username), Some(password)) => Some(BasicCredentials {
            username: username.clone(),
            password: Secret::new(password.clone()),
        }),
        // Token-only registries and git hosts accept any user name
        (None, Some(password)) => Some(BasicCredentials {
            username: "ferry".to_string(),
            password: Secret::new(password.clone()),
        }),
        _ => None,
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn git(&self, _project: &Project) -> Result<Option<BasicCredentials>> {
        Ok(self.git.clone())
    }

    async fn registry(&self, _project: &Project) -> Result<Option<BasicCredentials>> {
        Ok(self.registry.clone())
    }

    async fn cluster(&self, _environment: &str) -> Result<ClusterCredentials> {
        Ok(self.cluster.clone())
    }
}
