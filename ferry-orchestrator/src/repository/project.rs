//! Project Repository
//!
//! Handles all database operations related to projects.

use ferry_core::domain::project::Project;
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a new project
pub async fn create(pool: &PgPool, project: &Project) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO projects (id, name, git_url, git_provider, repository, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(project.id)
    .bind(&project.name)
    .bind(&project.git_url)
    .bind(&project.git_provider)
    .bind(&project.repository)
    .bind(project.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a project by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, name, git_url, git_provider, repository, created_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find projects by normalized repository identity
pub async fn find_by_repository(
    pool: &PgPool,
    repository: &str,
) -> Result<Vec<Project>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, name, git_url, git_provider, repository, created_at
        FROM projects
        WHERE repository = $1
        "#,
    )
    .bind(repository)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    git_url: String,
    git_provider: String,
    repository: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            git_url: row.git_url,
            git_provider: row.git_provider,
            repository: row.repository,
            created_at: row.created_at,
        }
    }
}
