//! Deployment Repository
//!
//! Handles all database operations related to deployments.

use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::DeploymentUpdate;

const DEPLOYMENT_COLUMNS: &str = r#"
    id, build_id, environment, replicas, namespace, service_name, ingress_host,
    image, status, failed_stage, failure_kind, error_message, rollback_count,
    removed_at, created_at, started_at, completed_at, updated_at
"#;

/// Insert a new deployment
///
/// Fails with a unique violation when the (build, environment) pair already
/// has a deployment in a non-terminal status.
pub async fn create(pool: &PgPool, deployment: &Deployment) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO deployments (
            id, build_id, environment, replicas, namespace, service_name, ingress_host,
            image, status, rollback_count, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(deployment.id)
    .bind(deployment.build_id)
    .bind(&deployment.environment)
    .bind(deployment.replicas)
    .bind(&deployment.namespace)
    .bind(&deployment.service_name)
    .bind(&deployment.ingress_host)
    .bind(&deployment.image)
    .bind(deployment.status.as_str())
    .bind(deployment.rollback_count)
    .bind(deployment.created_at)
    .bind(deployment.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a deployment by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Deployment>, sqlx::Error> {
    let sql = format!("SELECT {} FROM deployments WHERE id = $1", DEPLOYMENT_COLUMNS);

    let row = sqlx::query_as::<_, DeploymentRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Deployment::try_from).transpose()
}

/// Find deployments of a build, newest first
pub async fn find_by_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<Deployment>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM deployments WHERE build_id = $1 ORDER BY created_at DESC",
        DEPLOYMENT_COLUMNS
    );

    let rows = sqlx::query_as::<_, DeploymentRow>(&sql)
        .bind(build_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Deployment::try_from).collect()
}

/// Find deployments in any of the given statuses, newest first
pub async fn find_by_status(
    pool: &PgPool,
    statuses: &[DeploymentStatus],
) -> Result<Vec<Deployment>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM deployments WHERE status = ANY($1) ORDER BY created_at DESC",
        DEPLOYMENT_COLUMNS
    );

    let rows = sqlx::query_as::<_, DeploymentRow>(&sql)
        .bind(status_names(statuses))
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Deployment::try_from).collect()
}

/// Conditionally apply a status transition
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    from: &[DeploymentStatus],
    update: DeploymentUpdate,
) -> Result<Option<Deployment>, sqlx::Error> {
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
        UPDATE deployments SET
            status = $3,
            updated_at = $4,
            started_at = CASE WHEN $3 <> 'pending' THEN COALESCE(started_at, $4) ELSE started_at END,
            completed_at = CASE WHEN $5 THEN $4 ELSE completed_at END,
            image = COALESCE($6, image),
            replicas = COALESCE($7, replicas),
            failed_stage = COALESCE($8, failed_stage),
            failure_kind = COALESCE($9, failure_kind),
            error_message = COALESCE($10, error_message),
            rollback_count = rollback_count + CASE WHEN $11 THEN 1 ELSE 0 END,
            removed_at = CASE WHEN $12 THEN $4 ELSE removed_at END
        WHERE id = $1 AND status = ANY($2)
        RETURNING {}
        "#,
        DEPLOYMENT_COLUMNS
    );

    let row = sqlx::query_as::<_, DeploymentRow>(&sql)
        .bind(id)
        .bind(status_names(from))
        .bind(update.status.as_str())
        .bind(chrono::Utc::now())
        .bind(update.status.is_terminal())
        .bind(&update.image)
        .bind(update.replicas)
        .bind(failed_stage)
        .bind(failure_kind)
        .bind(error_message)
        .bind(update.increment_rollbacks)
        .bind(update.removed)
        .fetch_optional(pool)
        .await?;

    row.map(Deployment::try_from).transpose()
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_names(statuses: &[DeploymentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    build_id: Uuid,
    environment: String,
    replicas: i32,
    namespace: String,
    service_name: String,
    ingress_host: Option<String>,
    image: String,
    status: String,
    failed_stage: Option<String>,
    failure_kind: Option<String>,
    error_message: Option<String>,
    rollback_count: i32,
    removed_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = sqlx::Error;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        Ok(Deployment {
            id: row.id,
            build_id: row.build_id,
            environment: row.environment,
            replicas: row.replicas,
            namespace: row.namespace,
            service_name: row.service_name,
            ingress_host: row.ingress_host,
            image: row.image,
            status: row.status.parse().map_err(decode_error)?,
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
            rollback_count: row.rollback_count,
            removed_at: row.removed_at,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}
