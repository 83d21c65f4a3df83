//! Kubernetes cluster adapter
//!
//! Drives `kubectl`. A workload is rendered as a `v1/List` holding a
//! Deployment, a Service and an optional Ingress, and applied from stdin so
//! that repeated applies update the objects in place.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::process::{self, ProcessSpec};
use super::{
    AdapterError, AdapterErrorKind, AdapterResult, ClusterAdapter, ReadinessInfo, WorkloadRef,
    WorkloadSpec,
};
use crate::service::cancel::CancelSignal;
use crate::service::credentials::ClusterCredentials;
use crate::service::log_sink::ExecutionLog;

/// Port the Service exposes in front of the container port
const SERVICE_PORT: u16 = 80;

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

pub struct KubectlCluster {
    program: String,
}

impl KubectlCluster {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn kubectl(&self, credentials: &ClusterCredentials, namespace: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.program);
        if let Some(kubeconfig) = &credentials.kubeconfig {
            spec = spec.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &credentials.context {
            spec = spec.arg("--context").arg(context);
        }
        spec.arg("--namespace").arg(namespace)
    }
}

#[async_trait]
impl ClusterAdapter for KubectlCluster {
    async fn apply(
        &self,
        spec: &WorkloadSpec,
        credentials: &ClusterCredentials,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let manifest = serde_json::to_vec(&render_manifest(spec))
            .map_err(|e| AdapterError::invalid_input(format!("cannot render manifest: {}", e)))?;

        log.info(format!(
            "Applying {} ({} replicas of {}) to namespace {}",
            spec.name, spec.replicas, spec.image, spec.namespace
        ));

        let command = self
            .kubectl(credentials, &spec.namespace)
            .args(["apply", "-f", "-"])
            .stdin(manifest);
        process::run(&command, Some(log), cancel, classify_kubectl_error).await?;

        info!("Applied workload {}/{}", spec.namespace, spec.name);
        Ok(())
    }

    async fn scale(
        &self,
        workload: &WorkloadRef,
        replicas: i32,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let command = self
            .kubectl(credentials, &workload.namespace)
            .arg("scale")
            .arg(format!("deployment/{}", workload.name))
            .arg(format!("--replicas={}", replicas));
        process::run(&command, None, cancel, classify_kubectl_error).await?;

        info!(
            "Scaled workload {}/{} to {} replicas",
            workload.namespace, workload.name, replicas
        );
        Ok(())
    }

    async fn get_status(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<ReadinessInfo> {
        let command = self
            .kubectl(credentials, &workload.namespace)
            .args(["get", "deployment", workload.name.as_str(), "-o", "json"]);
        let output = process::run(&command, None, cancel, classify_kubectl_error).await?;

        let object: Value = serde_json::from_str(&output.stdout).map_err(|e| {
            AdapterError::transient(format!("unreadable status of {}: {}", workload.name, e))
        })?;
        Ok(parse_status(&object))
    }

    async fn rollback(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        log: &ExecutionLog,
        cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        log.info(format!("Rolling back {} to its previous revision", workload.name));

        let command = self
            .kubectl(credentials, &workload.namespace)
            .args(["rollout", "undo"])
            .arg(format!("deployment/{}", workload.name));
        process::run(&command, Some(log), cancel, classify_kubectl_error).await?;

        info!("Rolled back workload {}/{}", workload.namespace, workload.name);
        Ok(())
    }

    async fn delete(
        &self,
        workload: &WorkloadRef,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<()> {
        let command = self
            .kubectl(credentials, &workload.namespace)
            .args(["delete", "deployment,service,ingress", "--ignore-not-found"])
            .arg("--selector")
            .arg(format!("app={}", workload.name));
        process::run(&command, None, cancel, classify_kubectl_error).await?;

        info!("Deleted workload {}/{}", workload.namespace, workload.name);
        Ok(())
    }

    async fn get_logs(
        &self,
        workload: &WorkloadRef,
        tail_lines: i64,
        credentials: &ClusterCredentials,
        cancel: &CancelSignal,
    ) -> AdapterResult<String> {
        let command = self
            .kubectl(credentials, &workload.namespace)
            .arg("logs")
            .arg("--selector")
            .arg(format!("app={}", workload.name))
            .arg(format!("--tail={}", tail_lines))
            .args(["--prefix", "--all-containers"]);
        let output = process::run(&command, None, cancel, classify_kubectl_error).await?;

        Ok(output.stdout)
    }

    fn supports_revision_history(&self) -> bool {
        true
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Renders the Deployment, Service and optional Ingress of a workload
pub fn render_manifest(spec: &WorkloadSpec) -> Value {
    let probe = |probe: &super::Probe| {
        json!({
            "httpGet": { "path": probe.path, "port": spec.port },
            "initialDelaySeconds": probe.initial_delay_secs,
            "periodSeconds": probe.period_secs,
        })
    };

    let mut items = vec![
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": spec.name,
                "namespace": spec.namespace,
                "labels": spec.labels,
            },
            "spec": {
                "replicas": spec.replicas,
                "revisionHistoryLimit": 10,
                "selector": { "matchLabels": { "app": spec.name } },
                "template": {
                    "metadata": { "labels": spec.labels },
                    "spec": {
                        "containers": [{
                            "name": spec.name,
                            "image": spec.image,
                            "ports": [{ "containerPort": spec.port }],
                            "resources": {
                                "requests": {
                                    "cpu": spec.resources.cpu_request,
                                    "memory": spec.resources.memory_request,
                                },
                                "limits": {
                                    "cpu": spec.resources.cpu_limit,
                                    "memory": spec.resources.memory_limit,
                                },
                            },
                            "livenessProbe": probe(&spec.liveness),
                            "readinessProbe": probe(&spec.readiness),
                        }],
                    },
                },
            },
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": spec.service_name,
                "namespace": spec.namespace,
                "labels": spec.labels,
            },
            "spec": {
                "selector": { "app": spec.name },
                "ports": [{
                    "port": SERVICE_PORT,
                    "targetPort": spec.port,
                    "protocol": "TCP",
                }],
            },
        }),
    ];

    if let Some(host) = &spec.ingress_host {
        items.push(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": spec.service_name,
                "namespace": spec.namespace,
                "labels": spec.labels,
            },
            "spec": {
                "rules": [{
                    "host": host,
                    "http": {
                        "paths": [{
                            "path": "/",
                            "pathType": "Prefix",
                            "backend": {
                                "service": {
                                    "name": spec.service_name,
                                    "port": { "number": SERVICE_PORT },
                                },
                            },
                        }],
                    },
                }],
            },
        }));
    }

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": items,
    })
}

/// Reads rollout state out of a `kubectl get deployment -o json` object
pub fn parse_status(object: &Value) -> ReadinessInfo {
    let int = |pointer: &str| object.pointer(pointer).and_then(Value::as_i64).unwrap_or(0);

    ReadinessInfo {
        desired: int("/spec/replicas") as i32,
        ready: int("/status/readyReplicas") as i32,
        available: int("/status/availableReplicas") as i32,
        updated: int("/status/updatedReplicas") as i32,
        generation: int("/metadata/generation"),
        observed_generation: int("/status/observedGeneration"),
        image: object
            .pointer("/spec/template/spec/containers/0/image")
            .and_then(Value::as_str)
            .map(str::to_string),
        revision: object
            .pointer("/metadata/annotations")
            .and_then(|annotations| annotations.get(REVISION_ANNOTATION))
            .and_then(Value::as_str)
            .and_then(|r| r.parse().ok()),
    }
}

/// Classifies lowercased kubectl output
pub fn classify_kubectl_error(output: &str) -> AdapterErrorKind {
    const AUTH: &[&str] = &[
        "forbidden",
        "unauthorized",
        "you must be logged in",
        "provide credentials",
    ];
    const NOT_FOUND: &[&str] = &["(notfound)", "not found"];
    const INVALID: &[&str] = &[
        "is invalid",
        "error validating",
        "unable to decode",
        "error parsing",
        "unknown field",
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
