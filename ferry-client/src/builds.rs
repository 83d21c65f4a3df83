//! Build endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use ferry_core::domain::build::Build;
use ferry_core::domain::deployment::Deployment;
use ferry_core::domain::log::LogEntry;
use ferry_core::dto::build::RunPipeline;
use uuid::Uuid;

impl OrchestratorClient {
    /// Start a manual build of `git_ref` (branch, tag, `refs/...` or commit)
    ///
    /// Returns as soon as the build is accepted; poll [`get_build`] for its
    /// progress.
    ///
    /// [`get_build`]: OrchestratorClient::get_build
    pub async fn run_pipeline(&self, pipeline_id: Uuid, git_ref: &str) -> Result<Build> {
        let url = self.url(&format!("/pipeline/{}/run", pipeline_id));
        let response = self
            .client
            .post(&url)
            .json(&RunPipeline {
                git_ref: git_ref.to_string(),
            })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// List the builds of a pipeline, newest first
    pub async fn list_builds(&self, pipeline_id: Uuid) -> Result<Vec<Build>> {
        let url = self.url(&format!("/pipeline/{}/builds", pipeline_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Get a build by ID
    pub async fn get_build(&self, build_id: Uuid) -> Result<Build> {
        let url = self.url(&format!("/build/{}", build_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Get the execution log of a build
    pub async fn get_build_logs(&self, build_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/build/{}/logs", build_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Cancel a build that has not finished yet
    pub async fn cancel_build(&self, build_id: Uuid) -> Result<Build> {
        let url = self.url(&format!("/build/{}/cancel", build_id));
        let response = self.client.post(&url).send().await?;

        Self::handle_response(response).await
    }

    /// List the deployments of a build, newest first
    pub async fn list_deployments(&self, build_id: Uuid) -> Result<Vec<Deployment>> {
        let url = self.url(&format!("/build/{}/deployments", build_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }
}
