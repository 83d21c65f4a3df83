//! Project, pipeline and trigger endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use ferry_core::domain::pipeline::Pipeline;
use ferry_core::domain::project::Project;
use ferry_core::domain::trigger::Trigger;
use ferry_core::dto::pipeline::{CreatePipeline, CreateProject, CreateTrigger, SetPipelineEnabled};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Projects
    // =============================================================================

    /// Register a source repository
    pub async fn create_project(&self, req: CreateProject) -> Result<Project> {
        let response = self.client.post(self.url("/project")).json(&req).send().await?;

        Self::handle_response(response).await
    }

    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    ///
    /// # Example
    /// ```no_run
    /// # use ferry_client::OrchestratorClient;
    /// # use ferry_core::dto::pipeline::CreatePipeline;
    /// # use uuid::Uuid;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let pipeline = client.create_pipeline(CreatePipeline {
    ///     project_id: Uuid::new_v4(),
    ///     name: "web".to_string(),
    ///     description: None,
    ///     config: "{\"port\": 3000}".to_string(),
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        let response = self.client.post(self.url("/pipeline")).json(&req).send().await?;

        Self::handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let url = self.url(&format!("/pipeline/{}", pipeline_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }

    /// Enable or disable a pipeline
    pub async fn set_pipeline_enabled(&self, pipeline_id: Uuid, enabled: bool) -> Result<Pipeline> {
        let url = self.url(&format!("/pipeline/{}/enabled", pipeline_id));
        let response = self
            .client
            .post(&url)
            .json(&SetPipelineEnabled { enabled })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    // =============================================================================
    // Triggers
    // =============================================================================

    /// Add a trigger to a pipeline
    pub async fn create_trigger(&self, pipeline_id: Uuid, req: CreateTrigger) -> Result<Trigger> {
        let url = self.url(&format!("/pipeline/{}/trigger", pipeline_id));
        let response = self.client.post(&url).json(&req).send().await?;

        Self::handle_response(response).await
    }

    /// List the triggers of a pipeline
    pub async fn list_triggers(&self, pipeline_id: Uuid) -> Result<Vec<Trigger>> {
        let url = self.url(&format!("/pipeline/{}/triggers", pipeline_id));
        let response = self.client.get(&url).send().await?;

        Self::handle_response(response).await
    }
}
