//! Build Repository
//!
//! Handles all database operations related to builds. Status changes go
//! through [`transition`], a conditional update that only applies while the
//! build is still in one of the expected statuses.

use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::git_ref::GitRef;
use sqlx::PgPool;
use uuid::Uuid;

use super::BuildUpdate;

const BUILD_COLUMNS: &str = r#"
    id, pipeline_id, ref_kind, ref_name, source, requested_commit, commit_sha,
    status, image_name, image_tag, failed_stage, failure_kind, error_message,
    created_at, started_at, completed_at, updated_at
"#;

/// Insert a new build
///
/// Fails with a unique violation when the pipeline already has a build in a
/// non-terminal status.
pub async fn create(pool: &PgPool, build: &Build) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO builds (
            id, pipeline_id, ref_kind, ref_name, source, requested_commit, commit_sha,
            status, image_name, image_tag, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(build.id)
    .bind(build.pipeline_id)
    .bind(build.source_ref.kind())
    .bind(build.source_ref.name())
    .bind(build.source.as_str())
    .bind(&build.requested_commit)
    .bind(&build.commit)
    .bind(build.status.as_str())
    .bind(&build.image_name)
    .bind(&build.image_tag)
    .bind(build.created_at)
    .bind(build.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a build by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Build>, sqlx::Error> {
    let sql = format!("SELECT {} FROM builds WHERE id = $1", BUILD_COLUMNS);

    let row = sqlx::query_as::<_, BuildRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Build::try_from).transpose()
}

/// Find builds by pipeline ID, newest first
pub async fn find_by_pipeline(pool: &PgPool, pipeline_id: Uuid) -> Result<Vec<Build>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM builds WHERE pipeline_id = $1 ORDER BY created_at DESC",
        BUILD_COLUMNS
    );

    let rows = sqlx::query_as::<_, BuildRow>(&sql)
        .bind(pipeline_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Build::try_from).collect()
}

/// Find builds in any of the given statuses, newest first
pub async fn find_by_status(
    pool: &PgPool,
    statuses: &[BuildStatus],
) -> Result<Vec<Build>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM builds WHERE status = ANY($1) ORDER BY created_at DESC",
        BUILD_COLUMNS
    );

    let rows = sqlx::query_as::<_, BuildRow>(&sql)
        .bind(status_names(statuses))
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Build::try_from).collect()
}

/// Conditionally apply a status transition
///
/// Returns `None` when the build is missing or no longer in one of `from`.
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    from: &[BuildStatus],
    update: BuildUpdate,
) -> Result<Option<Build>, sqlx::Error> {
    let (failed_stage, failure_kind, error_message) = match &update.failure {
        Some(f) => (
            Some(f.stage.as_str()),
            Some(f.kind.as_str()),
            Some(f.message.as_str()),
        ),
        None => (None, None, None),
    };

    let sql = format!(
        r#"
        UPDATE builds SET
            status = $3,
            updated_at = $4,
            started_at = CASE WHEN $3 <> 'pending' THEN COALESCE(started_at, $4) ELSE started_at END,
            completed_at = CASE WHEN $5 THEN $4 ELSE completed_at END,
            commit_sha = COALESCE($6, commit_sha),
            image_name = COALESCE($7, image_name),
            image_tag = COALESCE($8, image_tag),
            failed_stage = COALESCE($9, failed_stage),
            failure_kind = COALESCE($10, failure_kind),
            error_message = COALESCE($11, error_message)
        WHERE id = $1 AND status = ANY($2)
        RETURNING {}
        "#,
        BUILD_COLUMNS
    );

    let row = sqlx::query_as::<_, BuildRow>(&sql)
        .bind(id)
        .bind(status_names(from))
        .bind(update.status.as_str())
        .bind(chrono::Utc::now())
        .bind(update.status.is_terminal())
        .bind(&update.commit)
        .bind(&update.image_name)
        .bind(&update.image_tag)
        .bind(failed_stage)
        .bind(failure_kind)
        .bind(error_message)
        .fetch_optional(pool)
        .await?;

    row.map(Build::try_from).transpose()
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_names(statuses: &[BuildStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    pipeline_id: Uuid,
    ref_kind: String,
    ref_name: String,
    source: String,
    requested_commit: Option<String>,
    commit_sha: Option<String>,
    status: String,
    image_name: Option<String>,
    image_tag: Option<String>,
    failed_stage: Option<String>,
    failure_kind: Option<String>,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<BuildRow> for Build {
    type Error = sqlx::Error;

    fn try_from(row: BuildRow) -> Result<Self, Self::Error> {
        let source_ref = GitRef::from_parts(&row.ref_kind, row.ref_name)
            .ok_or_else(|| decode_error(format!("unknown ref kind '{}'", row.ref_kind)))?;

        Ok(Build {
            id: row.id,
            pipeline_id: row.pipeline_id,
            source_ref,
            source: row.source.parse().map_err(decode_error)?,
            requested_commit: row.requested_commit,
            commit: row.commit_sha,
            status: row.status.parse().map_err(decode_error)?,
            image_name: row.image_name,
            image_tag: row.image_tag,
            failed_stage: row
                .failed_stage
                .map(|s| s.parse())
                .transpose()
                .map_err(decode_error)?,
            failure_kind: row
                .failure_kind
                .map(|s| s.parse())
                .transpose()
                .map_err(decode_error)?,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}
