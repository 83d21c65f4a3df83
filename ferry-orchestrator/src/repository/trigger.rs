//! Trigger Repository
//!
//! Handles all database operations related to pipeline triggers.

use ferry_core::domain::trigger::{Trigger, TriggerKind};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a new trigger
pub async fn create(pool: &PgPool, trigger: &Trigger) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO triggers (id, pipeline_id, kind, branch, tag, schedule, active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(trigger.id)
    .bind(trigger.pipeline_id)
    .bind(trigger.kind.as_str())
    .bind(&trigger.branch)
    .bind(&trigger.tag)
    .bind(&trigger.schedule)
    .bind(trigger.active)
    .bind(trigger.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List the triggers of a pipeline, oldest first
pub async fn find_by_pipeline(pool: &PgPool, pipeline_id: Uuid) -> Result<Vec<Trigger>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TriggerRow>(
        r#"
        SELECT id, pipeline_id, kind, branch, tag, schedule, active, created_at
        FROM triggers
        WHERE pipeline_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Trigger::try_from).collect()
}

/// List every active schedule trigger
pub async fn find_active_schedules(pool: &PgPool) -> Result<Vec<Trigger>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TriggerRow>(
        r#"
        SELECT id, pipeline_id, kind, branch, tag, schedule, active, created_at
        FROM triggers
        WHERE kind = $1 AND active
        "#,
    )
    .bind(TriggerKind::Schedule.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Trigger::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TriggerRow {
    id: Uuid,
    pipeline_id: Uuid,
    kind: String,
    branch: Option<String>,
    tag: Option<String>,
    schedule: Option<String>,
    active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = sqlx::Error;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(Trigger {
            id: row.id,
            pipeline_id: row.pipeline_id,
            kind: row.kind.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            branch: row.branch,
            tag: row.tag,
            schedule: row.schedule,
            active: row.active,
            created_at: row.created_at,
        })
    }
}
