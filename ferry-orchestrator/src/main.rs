use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod adapter;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;

#[cfg(test)]
mod testing;

use adapter::{ContainerCliBuilder, GitSource, KubectlCluster};
use config::{Config, StoreKind};
use repository::{MemoryStore, PgStore, Store};
use service::credentials::EnvCredentials;
use service::{ControlPlane, Runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ferry_orchestrator=debug,tower_http=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Ferry Orchestrator...");

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    tokio::fs::create_dir_all(&config.workspace_dir)
        .await
        .with_context(|| format!("Failed to create workspace {}", config.workspace_dir.display()))?;

    let credentials = Arc::new(EnvCredentials::from_config(&config));
    let source = Arc::new(GitSource::new());
    let images = Arc::new(ContainerCliBuilder::new(config.container_cli.clone()));
    let cluster = Arc::new(KubectlCluster::new(config.kubectl.clone()));
    let addr = config.bind_addr.clone();

    let runtime = Runtime::new(store, credentials, config);
    let control = ControlPlane::new(runtime, source, images, cluster);

    // Settle whatever a previous process left behind, then keep watching
    tokio::spawn(Arc::new(control.reconciler()).run());
    tokio::spawn(Arc::new(control.schedule_ticker()).run());
    tokio::spawn(
        Arc::clone(&control.runtime().logs).run_flusher(control.runtime().config.log_flush_interval),
    );

    // Build router with all API endpoints
    let app = api::create_router(control);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
