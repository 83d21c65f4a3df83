//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use ferry_core::domain::pipeline::Pipeline;
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a new pipeline
pub async fn create(pool: &PgPool, pipeline: &Pipeline) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, project_id, name, description, config, enabled, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(pipeline.id)
    .bind(pipeline.project_id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(&pipeline.config)
    .bind(pipeline.enabled)
    .bind(pipeline.created_at)
    .bind(pipeline.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, name, description, config, enabled, created_at, updated_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List pipelines of a project
pub async fn find_by_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, name, description, config, enabled, created_at, updated_at
        FROM pipelines
        WHERE project_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Enable or disable a pipeline, returning the updated record
pub async fn set_enabled(
    pool: &PgPool,
    id: Uuid,
    enabled: bool,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        UPDATE pipelines
        SET enabled = $2, updated_at = $3
        WHERE id = $1
        RETURNING id, project_id, name, description, config, enabled, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(enabled)
    .bind(chrono::Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    config: String,
    enabled: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            config: row.config,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
