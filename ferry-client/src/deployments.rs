//! Deployment endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use ferry_core::domain::deployment::Deployment;
use ferry_core::domain::log::LogEntry;
use ferry_core::dto::deployment::{CreateDeployment, ScaleDeployment, WorkloadLogs};
use uuid::Uuid;

impl OrchestratorClient {
    /// Deploy a successful build to an environment
    pub async fn deploy(&self, req: CreateDeployment) -> Result<Deployment> {
        let response = self
            .client
            .post(self.url("/deployment"))
            .json(&req)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Get a deployment by ID
    pub async fn get_deployment(&self, deployment_id: Uuid) -> Result<Deployment> {
        let url = self.url(&format!("/deployment/{}", deployment_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Get the execution log of a deployment
    pub async fn get_deployment_logs(&self, deployment_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/deployment/{}/logs", deployment_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    pub async fn cancel_deployment(&self, deployment_id: Uuid) -> Result<Deployment> {
        let url = self.url(&format!("/deployment/{}/cancel", deployment_id));
        let response = self.client.post(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Roll a running deployment back to its previous revision
    pub async fn rollback(&self, deployment_id: Uuid) -> Result<Deployment> {
        let url = self.url(&format!("/deployment/{}/rollback", deployment_id));
        let response = self.client.post(&url).send().await?;

        Self::handle_response(response).await
    }

    pub async fn scale(&self, deployment_id: Uuid, replicas: i32) -> Result<Deployment> {
        let url = self.url(&format!("/deployment/{}/scale", deployment_id));
        let response = self
            .client
            .post(&url)
            .json(&ScaleDeployment { replicas })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Remove the deployment's workload from the cluster
    pub async fn teardown(&self, deployment_id: Uuid) -> Result<Deployment> {
        let url = self.url(&format!("/deployment/{}/teardown", deployment_id));
        let response = self.client.post(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Last `tail` lines of output of the running workload
    pub async fn workload_logs(&self, deployment_id: Uuid, tail: i64) -> Result<WorkloadLogs> {
        let url = self.url(&format!("/deployment/{}/workload-logs", deployment_id));
        let response = self
            .client
            .get(&url)
            .query(&[("tail", tail)])
            .send()
            .await?;

        Self::handle_response(response).await
    }
}
