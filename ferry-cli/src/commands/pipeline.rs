//! Pipeline command handlers
//!
//! Handles pipeline creation, enabling, triggers, and manual runs.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use ferry_client::OrchestratorClient;
use ferry_core::domain::pipeline::{BuildConfig, Pipeline};
use ferry_core::domain::trigger::{Trigger, TriggerKind};
use ferry_core::dto::pipeline::{CreatePipeline, CreateTrigger};
use uuid::Uuid;

use super::output::{print_build_details, print_build_summary};
use crate::config::Config;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline
    Create {
        /// Project the pipeline builds
        #[arg(short, long)]
        project: Uuid,

        /// Pipeline name
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Path to a build configuration JSON file
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Get pipeline details
    Get {
        /// Pipeline ID
        id: Uuid,
    },
    /// Accept builds again
    Enable { id: Uuid },
    /// Reject new builds; running ones finish
    Disable { id: Uuid },
    /// Add a trigger
    Trigger {
        /// Pipeline ID
        id: Uuid,

        /// webhook, schedule or manual
        #[arg(short, long)]
        kind: TriggerKind,

        /// Branch glob (e.g. main, release/*)
        #[arg(short, long)]
        branch: Option<String>,

        /// Tag glob (e.g. v*)
        #[arg(short, long)]
        tag: Option<String>,

        /// Cron expression with seconds, for schedule triggers
        #[arg(short, long)]
        schedule: Option<String>,
    },
    /// List triggers
    Triggers { id: Uuid },
    /// Start a manual build
    Run {
        /// Pipeline ID
        id: Uuid,

        /// Branch, tag, refs/... or commit SHA
        #[arg(short = 'r', long = "ref", default_value = "main")]
        git_ref: String,
    },
    /// List builds, newest first
    Builds { id: Uuid },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Create {
            project,
            name,
            description,
            config: config_path,
        } => create_pipeline(&client, project, name, description, config_path).await,
        PipelineCommands::Get { id } => {
            let pipeline = client.get_pipeline(id).await?;
            print_pipeline_details(&pipeline);
            Ok(())
        }
        PipelineCommands::Enable { id } => set_enabled(&client, id, true).await,
        PipelineCommands::Disable { id } => set_enabled(&client, id, false).await,
        PipelineCommands::Trigger {
            id,
            kind,
            branch,
            tag,
            schedule,
        } => {
            let trigger = client
                .create_trigger(
                    id,
                    CreateTrigger {
                        kind,
                        branch,
                        tag,
                        schedule,
                    },
                )
                .await?;
            println!("{}", "✓ Trigger added".green().bold());
            print_trigger(&trigger);
            Ok(())
        }
        PipelineCommands::Triggers { id } => list_triggers(&client, id).await,
        PipelineCommands::Run { id, git_ref } => {
            let build = client.run_pipeline(id, &git_ref).await?;
            println!("{}", "✓ Build started".green().bold());
            println!();
            print_build_details(&build);
            println!();
            println!(
                "{}",
                format!("Follow it with: ferry build logs {} --follow", build.id).dimmed()
            );
            Ok(())
        }
        PipelineCommands::Builds { id } => list_builds(&client, id).await,
    }
}

/// Create a new pipeline, checking the build configuration locally first
async fn create_pipeline(
    client: &OrchestratorClient,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read build configuration: {}", path))?,
        None => String::new(),
    };

    BuildConfig::parse(&config).map_err(|e| anyhow::anyhow!("Invalid build configuration: {}", e))?;

    let pipeline = client
        .create_pipeline(CreatePipeline {
            project_id,
            name,
            description,
            config,
        })
        .await?;

    println!("{}", "✓ Pipeline created successfully".green().bold());
    println!("  ID:   {}", pipeline.id.to_string().cyan());
    println!("  Name: {}", pipeline.name);
    Ok(())
}

async fn set_enabled(client: &OrchestratorClient, id: Uuid, enabled: bool) -> Result<()> {
    let pipeline = client.set_pipeline_enabled(id, enabled).await?;
    let state = if pipeline.enabled { "enabled" } else { "disabled" };
    println!("{} Pipeline {} is {}", "✓".green(), pipeline.name.cyan(), state);
    Ok(())
}

async fn list_triggers(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let triggers = client.list_triggers(id).await?;

    if triggers.is_empty() {
        println!("{}", "No triggers found.".yellow());
    } else {
        println!("{}", format!("Found {} trigger(s):", triggers.len()).bold());
        println!();
        for trigger in &triggers {
            print_trigger(trigger);
        }
    }
    Ok(())
}

async fn list_builds(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let builds = client.list_builds(id).await?;

    if builds.is_empty() {
        println!("{}", format!("No builds found for pipeline {}.", id).yellow());
    } else {
        println!(
            "{}",
            format!("Found {} build(s) for pipeline {}:", builds.len(), id).bold()
        );
        println!();
        for build in &builds {
            print_build_summary(build);
        }
    }
    Ok(())
}

fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:         {}", pipeline.id.to_string().cyan());
    println!("  Project ID: {}", pipeline.project_id.to_string().dimmed());
    println!("  Name:       {}", pipeline.name);
    if let Some(desc) = &pipeline.description {
        println!("  Description: {}", desc);
    }
    println!(
        "  Enabled:    {}",
        if pipeline.enabled {
            "yes".green()
        } else {
            "no".red()
        }
    );
    println!(
        "  Created:    {}",
        pipeline.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if !pipeline.config.trim().is_empty() {
        println!("\n{}", "Build configuration:".bold());
        match serde_json::from_str::<serde_json::Value>(&pipeline.config)
            .and_then(|value| serde_json::to_string_pretty(&value))
        {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", pipeline.config),
        }
    }
}

fn print_trigger(trigger: &Trigger) {
    println!(
        "  {} {} trigger {}",
        "▸".cyan(),
        trigger.kind.as_str(),
        trigger.id.to_string().dimmed()
    );
    if let Some(branch) = &trigger.branch {
        println!("    Branch:   {}", branch);
    }
    if let Some(tag) = &trigger.tag {
        println!("    Tag:      {}", tag);
    }
    if let Some(schedule) = &trigger.schedule {
        println!("    Schedule: {}", schedule);
    }
    if !trigger.active {
        println!("    {}", "inactive".dimmed());
    }
    println!();
}
