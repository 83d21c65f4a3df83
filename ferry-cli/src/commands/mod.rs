//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod deployment;
mod output;
mod pipeline;
mod project;

pub use build::BuildCommands;
pub use deployment::{DeployArgs, DeploymentCommands};
pub use pipeline::PipelineCommands;
pub use project::ProjectCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Source repository registration
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Build inspection and cancellation
    Build {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Deploy a successful build to an environment
    Deploy(DeployArgs),
    /// Deployment operations
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Project { command } => project::handle_project_command(command, config).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Build { command } => build::handle_build_command(command, config).await,
        Commands::Deploy(args) => deployment::deploy(args, config).await,
        Commands::Deployment { command } => {
            deployment::handle_deployment_command(command, config).await
        }
    }
}
