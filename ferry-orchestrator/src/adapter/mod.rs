//! Adapter Module
//!
//! Capability interfaces for the three external systems a pipeline touches,
//! and their production implementations:
//! - [`SourceAdapter`]: working copies of a repository (`git` CLI)
//! - [`ImageBuilder`]: container images (`podman`/`docker` CLI)
//! - [`ClusterAdapter`]: cluster workloads (`kubectl` CLI)
//!
//! Adapters know nothing about builds or deployments. Every call takes the
//! execution's log and cancel signal; long-running child processes stream
//! their output into the log and are killed when the signal fires.

pub mod cluster;
pub mod image;
pub mod process;
pub mod source;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::domain::build::ImageRef;
use ferry_core::domain::git_ref::GitRef;

use crate::service::cancel::CancelSignal;
use crate::service::credentials::{BasicCredentials, ClusterCredentials};
use crate::service::log_sink::ExecutionLog;

pub use cluster::KubectlCluster;
pub use image::ContainerCliBuilder;
pub use source::GitSource;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Bad URL, ref, image or workload
    NotFound,
    AuthFailed,
    /// Network or other retryable failure
    Transient,
    InvalidInput,
    Cancelled,
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdapterErrorKind::NotFound => "not found",
            AdapterErrorKind::AuthFailed => "authentication failed",
            AdapterErrorKind::Transient => "transient error",
            AdapterErrorKind::InvalidInput => "invalid input",
            AdapterErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// External-system failure, classified by the adapter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::NotFound, message)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::AuthFailed, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Transient, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::InvalidInput, message)
    }

    pub fn cancelled() -> Self {
        Self::new(AdapterErrorKind::Cancelled, "operation cancelled")
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

// =============================================================================
// Source
// =============================================================================

/// What to fetch
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub repo_url: String,
    pub git_ref: GitRef,
    /// Exact commit to check out instead of the ref's tip
    pub commit: Option<String>,
}

/// A local checkout at a resolved commit
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingCopy {
    pub path: PathBuf,
    pub commit: String,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetches `request` into `dest` and resolves it to an exact commit
    async fn acquire(
        &self,
        request: &SourceRequest,
        dest: &Path,
        credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<WorkingCopy>;

    /// Removes whatever exists at `dest`; succeeds when nothing does
    async fn release(&self, dest: &Path) -> AdapterResult<()>;
}

// =============================================================================
// Image
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    pub context_dir: PathBuf,
    /// Relative paths resolve against `context_dir`
    pub dockerfile: PathBuf,
    pub image_name: String,
    pub image_tag: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageBuildRequest {
    /// Rejects requests that cannot be built, before any external call
    pub fn validate(&self) -> AdapterResult<()> {
        if self.context_dir.as_os_str().is_empty() {
            return Err(AdapterError::invalid_input("working copy path is empty"));
        }
        if self.image_name.trim().is_empty() {
            return Err(AdapterError::invalid_input("image name is empty"));
        }
        if self.image_tag.trim().is_empty() {
            return Err(AdapterError::invalid_input("image tag is empty"));
        }
        Ok(())
    }

    pub fn image_ref(&self) -> ImageRef {
        ImageRef {
            name: self.image_name.clone(),
            tag: self.image_tag.clone(),
        }
    }
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds the image, streaming build output into `log` as it is produced
    async fn build(
        &self,
        request: &ImageBuildRequest,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<ImageRef>;

    async fn push(
        &self,
        image: &ImageRef,
        credentials: Option<&BasicCredentials>,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()>;

    /// True when `build` already publishes, making `push` redundant
    fn publishes_on_build(&self) -> bool {
        false
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Identifies a workload in a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            memory_request: "128Mi".to_string(),
            cpu_limit: "500m".to_string(),
            memory_limit: "512Mi".to_string(),
        }
    }
}

/// HTTP GET probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub path: String,
    pub initial_delay_secs: u32,
    pub period_secs: u32,
}

/// Desired state of a workload, its service and optional ingress
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub port: u16,
    pub resources: Resources,
    pub liveness: Probe,
    pub readiness: Probe,
    pub service_name: String,
    pub ingress_host: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl WorkloadSpec {
    /// Spec with default resources and probes against `health_path`
    pub fn new(
        workload: WorkloadRef,
        image: impl Into<String>,
        replicas: i32,
        port: u16,
        health_path: &str,
        service_name: impl Into<String>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), workload.name.clone());

        Self {
            name: workload.name,
            namespace: workload.namespace,
            image: image.into(),
            replicas,
            port,
            resources: Resources::default(),
            liveness: Probe {
                path: health_path.to_string(),
                initial_delay_secs: 30,
                period_secs: 10,
            },
            readiness: Probe {
                path: health_path.to_string(),
                initial_delay_secs: 5,
                period_secs: 5,
            },
            service_name: service_name.into(),
            ingress_host: None,
            labels,
        }
    }

    pub fn with_ingress_host(mut self, host: Option<String>) -> Self {
        self.ingress_host = host.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Rollout state of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessInfo {
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    pub generation: i64,
    pub observed_generation: i64,
    pub image: Option<String>,
    pub revision: Option<i64>,
}

impl ReadinessInfo {
    /// The controller has seen the latest spec and every desired replica is
    /// updated, ready and available
    pub fn is_ready(&self) -> bool {
        self.observed_generation >= self.generation
            && self.updated >= self.desired
            && self.ready >= self.desired
            && self.available >= self.desired
    }
}

#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Creates or updates the workload in place
    async fn apply(
        &self,
        spec: &WorkloadSpec,
        credentials: &ClusterCredentials,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()>;

    async fn scale(
        &self,
        workload: &WorkloadRef,
        replicas: i32,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<()>;

    async fn get_status(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<ReadinessInfo>;

    /// Reverts the workload to its previous revision
    async fn rollback(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()>;

    /// Removes the workload, its service and ingress; absent objects are fine
    async fn delete(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<()>;

    async fn get_logs(
        &self,
        workload: &WorkloadRef,
        tail_lines: i64,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<String>;

    /// Whether [`ClusterAdapter::rollback`] is available
    fn supports_revision_history(&self) -> bool;
}
