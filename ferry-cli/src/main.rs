//! Ferry CLI
//!
//! Command-line interface for interacting with the Ferry orchestrator.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry build and deployment CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "FERRY_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Poll interval for `--follow`, in milliseconds
    #[arg(long, env = "FERRY_FOLLOW_INTERVAL_MS", default_value_t = 1000)]
    follow_interval_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::new(cli.orchestrator_url, cli.follow_interval_ms);

    handle_command(cli.command, &config).await
}
