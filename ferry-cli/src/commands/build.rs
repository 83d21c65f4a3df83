//! Build command handlers
//!
//! Handles viewing builds, reading and following their logs, and
//! cancellation.

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use ferry_client::OrchestratorClient;
use ferry_core::domain::log::LogEntry;
use uuid::Uuid;

use super::output::{
    colorize_build_status, print_build_details, print_deployment_summary, print_log_block,
    print_log_entry, unseen,
};
use crate::config::Config;

/// Build subcommands
#[derive(Subcommand)]
pub enum BuildCommands {
    /// Get build details
    Get {
        /// Build ID
        id: Uuid,
    },
    /// Get build logs
    Logs {
        /// Build ID
        id: Uuid,

        /// Keep printing new entries until the build finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Cancel a running build
    Cancel { id: Uuid },
    /// List deployments of a build
    Deployments { id: Uuid },
}

/// Handle build commands
pub async fn handle_build_command(command: BuildCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        BuildCommands::Get { id } => {
            let build = client.get_build(id).await?;
            print_build_details(&build);
            Ok(())
        }
        BuildCommands::Logs { id, follow: false } => {
            let logs = client.get_build_logs(id).await?;
            print_log_block(&format!("Logs for build {}:", id), &logs);
            Ok(())
        }
        BuildCommands::Logs { id, follow: true } => follow_logs(&client, id, config.follow_interval).await,
        BuildCommands::Cancel { id } => {
            let build = client.cancel_build(id).await?;
            println!(
                "{} Build {} is {}",
                "✓".green(),
                build.id.to_string().cyan(),
                colorize_build_status(&build.status)
            );
            Ok(())
        }
        BuildCommands::Deployments { id } => {
            let deployments = client.list_deployments(id).await?;
            if deployments.is_empty() {
                println!("{}", format!("No deployments found for build {}.", id).yellow());
            } else {
                println!(
                    "{}",
                    format!("Found {} deployment(s):", deployments.len()).bold()
                );
                println!();
                for deployment in &deployments {
                    print_deployment_summary(deployment);
                }
            }
            Ok(())
        }
    }
}

/// Print the log as it grows until the build reaches a terminal status
async fn follow_logs(client: &OrchestratorClient, id: Uuid, interval: Duration) -> Result<()> {
    println!("{}", format!("Following logs for build {}:", id).bold());
    println!("{}", "─".repeat(80).dimmed());

    let mut last_printed: Option<LogEntry> = None;
    loop {
        // Read the status first so the final poll sees every entry
        let build = client.get_build(id).await?;
        let logs = client.get_build_logs(id).await?;

        for entry in unseen(&logs, last_printed.as_ref()) {
            print_log_entry(entry);
        }
        if let Some(last) = logs.last() {
            last_printed = Some(last.clone());
        }

        if build.status.is_terminal() {
            println!("{}", "─".repeat(80).dimmed());
            println!("Build {}", colorize_build_status(&build.status));
            if let Some(message) = &build.error_message {
                println!("{}", message.red());
            }
            return Ok(());
        }

        tokio::time::sleep(interval).await;
    }
}
