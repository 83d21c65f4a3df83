//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services drive executions through the adapters and persist every state
//! change through the [`Store`].

pub mod build;
pub mod cancel;
pub mod control;
pub mod credentials;
pub mod deployment;
pub mod dispatcher;
pub mod log_sink;
pub mod pipeline;
pub mod reconcile;
pub mod schedule;
pub mod stage;
pub mod webhook;

use std::sync::Arc;

use crate::config::Config;
use crate::repository::Store;
use cancel::ExecutionRegistry;
use credentials::CredentialProvider;
use log_sink::LogRegistry;

// Re-export for convenience
pub use build::BuildOrchestrator;
pub use control::ControlPlane;
pub use deployment::DeploymentOrchestrator;
pub use dispatcher::Dispatcher;
pub use pipeline as pipeline_service;

/// Collaborators shared by every service
#[derive(Clone)]
pub struct Runtime {
    pub store: Arc<dyn Store>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub logs: Arc<LogRegistry>,
    pub executions: Arc<ExecutionRegistry>,
    pub config: Arc<Config>,
}

impl Runtime {
    pub fn new(
        store: Arc<dyn Store>,
        credentials: Arc<dyn CredentialProvider>,
        config: Config,
    ) -> Self {
        let logs = Arc::new(LogRegistry::new(Arc::clone(&store), config.log_cap_bytes));
        Self {
            store,
            credentials,
            logs,
            executions: Arc::new(ExecutionRegistry::new()),
            config: Arc::new(config),
        }
    }
}
