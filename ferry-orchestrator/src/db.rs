use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create projects table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            git_url TEXT NOT NULL,
            git_provider VARCHAR(50) NOT NULL,
            repository TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            project_id UUID NOT NULL REFERENCES projects(id),
            name VARCHAR(255) NOT NULL,
            description TEXT,
            config TEXT NOT NULL DEFAULT '',
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create triggers table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triggers (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id),
            kind VARCHAR(20) NOT NULL,
            branch TEXT,
            tag TEXT,
            schedule TEXT,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create builds table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id),
            ref_kind VARCHAR(10) NOT NULL,
            ref_name TEXT NOT NULL,
            source VARCHAR(20) NOT NULL,
            requested_commit VARCHAR(64),
            commit_sha VARCHAR(64),
            status VARCHAR(20) NOT NULL,
            image_name TEXT,
            image_tag TEXT,
            failed_stage VARCHAR(20),
            failure_kind VARCHAR(20),
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one non-terminal build per pipeline
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_builds_one_active_per_pipeline
        ON builds(pipeline_id)
        WHERE status IN ('pending', 'cloning', 'building', 'pushing')
        "#,
    )
    .execute(pool)
    .await?;

    // Create deployments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            id UUID PRIMARY KEY,
            build_id UUID NOT NULL REFERENCES builds(id),
            environment VARCHAR(63) NOT NULL,
            replicas INTEGER NOT NULL,
            namespace VARCHAR(63) NOT NULL,
            service_name VARCHAR(63) NOT NULL,
            ingress_host TEXT,
            image TEXT NOT NULL,
            status VARCHAR(20) NOT NULL,
            failed_stage VARCHAR(20),
            failure_kind VARCHAR(20),
            error_message TEXT,
            rollback_count INTEGER NOT NULL DEFAULT 0,
            removed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one non-terminal deployment per (build, environment)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_deployments_one_active_per_environment
        ON deployments(build_id, environment)
        WHERE status IN ('pending', 'applying', 'rollback_requested', 'rolling_back')
        "#,
    )
    .execute(pool)
    .await?;

    // Create logs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_logs (
            id BIGSERIAL PRIMARY KEY,
            execution_id UUID NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_repository ON projects(repository)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_project_id ON pipelines(project_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_triggers_pipeline_id ON triggers(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_builds_pipeline_id ON builds(pipeline_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deployments_build_id ON deployments(build_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_execution_logs_execution_id ON execution_logs(execution_id, id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
