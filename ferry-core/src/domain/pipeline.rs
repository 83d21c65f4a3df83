//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Pipeline definition
///
/// Executions only ever read a pipeline; it changes through configuration
/// edits made by the project owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Build configuration text, see [`BuildConfig`]
    pub config: String,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Build configuration carried by a pipeline
///
/// Stored as JSON text on the pipeline. An empty text means all defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Fully qualified image name without tag; derived from the pipeline name when absent
    pub image: Option<String>,
    pub dockerfile: String,
    /// Build context relative to the repository root
    pub context: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Publish the image to its registry after building
    pub push: bool,
    /// Container port the workload listens on
    pub port: u16,
    /// HTTP path probed for liveness and readiness
    pub health_path: String,
    /// Environments deployed automatically after a successful build
    pub deploy: Vec<DeployTarget>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: None,
            dockerfile: "Dockerfile".to_string(),
            context: ".".to_string(),
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
            push: true,
            port: 8080,
            health_path: "/health".to_string(),
            deploy: Vec::new(),
        }
    }
}

/// An environment a successful build is rolled out to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployTarget {
    pub environment: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub namespace: String,
    pub service_name: String,
    #[serde(default)]
    pub ingress_host: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

impl BuildConfig {
    /// Parses and validates a pipeline's configuration text
    pub fn parse(text: &str) -> Result<Self, String> {
        let config = if text.trim().is_empty() {
            BuildConfig::default()
        } else {
            serde_json::from_str::<BuildConfig>(text)
                .map_err(|e| format!("invalid build configuration: {}", e))?
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        check_relative_path("context", &self.context)?;
        check_relative_path("dockerfile", &self.dockerfile)?;

        if let Some(image) = &self.image {
            if image.trim().is_empty() || image.contains(char::is_whitespace) {
                return Err(format!("image '{}' is not a valid image name", image));
            }
            if image.rsplit('/').next().is_some_and(|last| last.contains(':')) {
                return Err(format!(
                    "image '{}' must not carry a tag; tags are derived per build",
                    image
                ));
            }
        }

        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        if !self.health_path.starts_with('/') {
            return Err("health_path must start with '/'".to_string());
        }

        for target in &self.deploy {
            if target.environment.trim().is_empty() {
                return Err("deploy target environment cannot be empty".to_string());
            }
            if target.service_name.trim().is_empty() {
                return Err(format!(
                    "deploy target '{}' needs a service_name",
                    target.environment
                ));
            }
        }

        Ok(())
    }

    /// Image name for a pipeline, falling back to `<registry>/<pipeline slug>`
    pub fn image_name(&self, registry: &str, pipeline_name: &str) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => {
                let registry = registry.trim_end_matches('/');
                if registry.is_empty() {
                    slugify(pipeline_name)
                } else {
                    format!("{}/{}", registry, slugify(pipeline_name))
                }
            }
        }
    }
}

fn check_relative_path(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", field));
    }
    if value.starts_with('/') || value.split('/').any(|part| part == "..") {
        return Err(format!(
            "{} '{}' must be a relative path inside the repository",
            field, value
        ));
    }
    Ok(())
}

/// Lowercase, alphanumerics and single dashes only
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "pipeline".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BuildConfig::parse("  ").unwrap();
        assert_eq!(config, BuildConfig::default());
        assert!(config.push);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = BuildConfig::parse(
            r#"{"image": "registry.local/web", "deploy": [{"environment": "staging", "service_name": "web"}]}"#,
        )
        .unwrap();

        assert_eq!(config.image.as_deref(), Some("registry.local/web"));
        assert_eq!(config.dockerfile, "Dockerfile");
        assert_eq!(config.deploy[0].replicas, 1);
        assert_eq!(config.deploy[0].namespace, "");
    }

    #[test]
    fn test_rejects_unknown_fields_and_escaping_paths() {
        assert!(BuildConfig::parse(r#"{"stages": []}"#).is_err());
        assert!(BuildConfig::parse(r#"{"context": "../other"}"#).is_err());
        assert!(BuildConfig::parse(r#"{"dockerfile": "/etc/passwd"}"#).is_err());
        assert!(BuildConfig::parse("not json").is_err());
    }

    #[test]
    fn test_rejects_tagged_image_names() {
        assert!(BuildConfig::parse(r#"{"image": "web:latest"}"#).is_err());
        // A registry port is not a tag
        assert!(BuildConfig::parse(r#"{"image": "localhost:5000/web"}"#).is_ok());
    }

    #[test]
    fn test_image_name_falls_back_to_slug() {
        let config = BuildConfig::default();
        assert_eq!(
            config.image_name("registry.local/", "My Web App!"),
            "registry.local/my-web-app"
        );
        assert_eq!(config.image_name("", "API"), "api");
    }
}
