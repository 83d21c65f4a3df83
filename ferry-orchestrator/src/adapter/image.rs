//! Container image builder
//!
//! Builds and pushes images with a docker-compatible CLI (`podman` by
//! default). Registry passwords go through `login --password-stdin` into an
//! auth file private to the push call, deleted when the call returns.

use std::path::Path;

use async_trait::async_trait;
use ferry_core::domain::build::ImageRef;
use tracing::info;

use super::process::{self, ProcessSpec};
use super::{AdapterError, AdapterErrorKind, AdapterResult, ImageBuildRequest, ImageBuilder};
use crate::service::cancel::CancelSignal;
use crate::service::credentials::BasicCredentials;
use crate::service::log_sink::ExecutionLog;

pub struct ContainerCliBuilder {
    program: String,
}

impl ContainerCliBuilder {
    /// `program` is `podman`, `docker` or a path to either
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_args(request: &ImageBuildRequest) -> Vec<String> {
        let dockerfile = if request.dockerfile.is_absolute() {
            request.dockerfile.clone()
        } else {
            request.context_dir.join(&request.dockerfile)
        };

        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            dockerfile.display().to_string(),
            "--tag".to_string(),
            request.image_ref().to_string(),
        ];

        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(request.context_dir.display().to_string());
        args
    }
}

#[async_trait]
impl ImageBuilder for ContainerCliBuilder {
    async fn build(
        &self,
        request: &ImageBuildRequest,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<ImageRef> {
        request.validate()?;

        let image = request.image_ref();
        log.info(format!("Building image {}", image));

        let spec = ProcessSpec::new(&self.program).args(Self::build_args(request));
        process::run(&spec, Some(log), cancel, classify_container_error).await?;

        info!("Built image {}", image);
        Ok(image)
    }

    async fn push(
        &self,
        image: &ImageRef,
        credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        // Removed on drop, whichever way this call ends
        let auth_dir = match credentials {
            Some(_) => Some(
                tempfile::Builder::new()
                    .prefix("ferry-registry-auth-")
                    .tempdir()
                    .map_err(|e| {
                        AdapterError::transient(format!(
                            "cannot create registry auth directory: {}",
                            e
                        ))
                    })?,
            ),
            None => None,
        };
        let auth_env = auth_dir
            .as_ref()
            .map(|dir| auth_env(dir.path()))
            .unwrap_or_default();

        if let Some(credentials) = credentials {
            let registry = registry_host(&image.name);
            log.info(format!("Logging in to {} as {}", registry, credentials.username));

            let login = ProcessSpec::new(&self.program)
                .args(["login", "--username", credentials.username.as_str()])
                .arg("--password-stdin")
                .arg(registry)
                .envs(auth_env.clone())
                .stdin(credentials.password.expose().as_bytes().to_vec());
            process::run(&login, None, cancel, classify_container_error).await?;
        }

        log.info(format!("Pushing image {}", image));
        let spec = ProcessSpec::new(&self.program)
            .arg("push")
            .arg(image.to_string())
            .envs(auth_env);
        process::run(&spec, Some(log), cancel, classify_container_error).await?;

        info!("Pushed image {}", image);
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Points both podman and docker at an auth store inside `dir`
fn auth_env(dir: &Path) -> Vec<(String, String)> {
    vec![
        (
            "REGISTRY_AUTH_FILE".to_string(),
            dir.join("auth.json").display().to_string(),
        ),
        ("DOCKER_CONFIG".to_string(), dir.display().to_string()),
    ]
}

/// Registry host of an image name, `docker.io` when none is given
pub fn registry_host(image_name: &str) -> &str {
    match image_name.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => "docker.io",
    }
}

/// Classifies lowercased build or push output
pub fn classify_container_error(output: &str) -> AdapterErrorKind {
    const AUTH: &[&str] = &[
        "unauthorized",
        "authentication required",
        "requested access to the resource is denied",
        "invalid username/password",
        "403 forbidden",
    ];
    const NOT_FOUND: &[&str] = &[
        "manifest unknown",
        "name unknown",
        "repository does not exist",
        "no such file or directory",
        "cannot find the file",
        "image not known",
    ];
    const INVALID: &[&str] = &[
        "invalid reference format",
        "dockerfile parse error",
        "unknown instruction",
        "error building at step",
        "returned a non-zero code",
        "did not complete successfully",
    ];

    if AUTH.iter().any(|needle| output.contains(needle)) {
        AdapterErrorKind::AuthFailed
    } else if NOT_FOUND.iter().any(|needle| output.contains(needle)) {
        AdapterErrorKind::NotFound
    } else if INVALID.iter().any(|needle| output.contains(needle)) {
        AdapterErrorKind::InvalidInput
    } else {
        AdapterErrorKind::Transient
    }
}
