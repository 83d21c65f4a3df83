//! Project command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use ferry_core::dto::pipeline::CreateProject;

use crate::config::Config;

/// Project subcommands
#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Register a source repository
    Create {
        /// Project name
        #[arg(short, long)]
        name: String,

        /// Clone URL of the repository
        #[arg(short, long)]
        git_url: String,

        /// Provider delivering webhooks: github, gitlab or generic
        #[arg(short, long, default_value = "generic")]
        provider: String,
    },
}

pub async fn handle_project_command(command: ProjectCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ProjectCommands::Create {
            name,
            git_url,
            provider,
        } => {
            let project = client
                .create_project(CreateProject {
                    name,
                    git_url,
                    git_provider: provider,
                })
                .await?;

            println!("{}", "✓ Project created".green().bold());
            println!("  ID:         {}", project.id.to_string().cyan());
            println!("  Name:       {}", project.name);
            println!("  Repository: {}", project.repository.dimmed());
            println!("  Provider:   {}", project.git_provider);
            Ok(())
        }
    }
}
