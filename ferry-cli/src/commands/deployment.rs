//! Deployment command handlers

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use ferry_core::domain::deployment::Deployment;
use ferry_core::dto::deployment::CreateDeployment;
use uuid::Uuid;

use super::output::{colorize_deployment_status, print_deployment_details, print_log_block};
use crate::config::Config;

/// Arguments of `ferry deploy`
#[derive(Args)]
pub struct DeployArgs {
    /// Build to deploy; must have succeeded
    build: Uuid,

    /// Target environment (e.g. staging, prod)
    #[arg(short, long)]
    environment: String,

    /// Service name, used as the workload name prefix
    #[arg(short, long)]
    service: String,

    #[arg(short, long, default_value = "1")]
    replicas: i32,

    /// Namespace; the orchestrator's default when omitted
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Hostname routed to the service through an ingress
    #[arg(long)]
    host: Option<String>,
}

/// Deployment subcommands
#[derive(Subcommand)]
pub enum DeploymentCommands {
    /// Get deployment details
    Get { id: Uuid },
    /// Get the execution log of a deployment
    Logs { id: Uuid },
    /// Cancel a deployment that is still rolling out
    Cancel { id: Uuid },
    /// Return to the previous revision
    Rollback { id: Uuid },
    /// Change the replica count
    Scale {
        id: Uuid,

        #[arg(short, long)]
        replicas: i32,
    },
    /// Remove the workload from the cluster
    Teardown { id: Uuid },
    /// Recent output of the running workload
    WorkloadLogs {
        id: Uuid,

        /// Number of lines from the end
        #[arg(short, long, default_value = "100")]
        tail: i64,
    },
}

/// Deploy a build
pub async fn deploy(args: DeployArgs, config: &Config) -> Result<()> {
    let client = config.client();

    let deployment = client
        .deploy(CreateDeployment {
            build_id: args.build,
            environment: args.environment,
            replicas: args.replicas,
            namespace: args.namespace,
            service_name: args.service,
            ingress_host: args.host,
        })
        .await?;

    println!("{}", "✓ Deployment started".green().bold());
    println!();
    print_deployment_details(&deployment);
    Ok(())
}

/// Handle deployment commands
pub async fn handle_deployment_command(command: DeploymentCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        DeploymentCommands::Get { id } => {
            let deployment = client.get_deployment(id).await?;
            print_deployment_details(&deployment);
        }
        DeploymentCommands::Logs { id } => {
            let logs = client.get_deployment_logs(id).await?;
            print_log_block(&format!("Logs for deployment {}:", id), &logs);
        }
        DeploymentCommands::Cancel { id } => {
            print_outcome("Cancelled", &client.cancel_deployment(id).await?);
        }
        DeploymentCommands::Rollback { id } => {
            print_outcome("Rollback requested for", &client.rollback(id).await?);
        }
        DeploymentCommands::Scale { id, replicas } => {
            let deployment = client.scale(id, replicas).await?;
            print_outcome("Scaled", &deployment);
            println!("  Replicas: {}", deployment.replicas);
        }
        DeploymentCommands::Teardown { id } => {
            print_outcome("Tore down", &client.teardown(id).await?);
        }
        DeploymentCommands::WorkloadLogs { id, tail } => {
            let workload = client.workload_logs(id, tail).await?;
            if workload.logs.is_empty() {
                println!("{}", "No workload output.".yellow());
            } else {
                print!("{}", workload.logs);
                if !workload.logs.ends_with('\n') {
                    println!();
                }
            }
        }
    }

    Ok(())
}

fn print_outcome(action: &str, deployment: &Deployment) {
    println!(
        "{} {} deployment {} ({})",
        "✓".green(),
        action,
        deployment.id.to_string().cyan(),
        colorize_deployment_status(&deployment.status)
    );
}
