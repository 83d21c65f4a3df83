//! Log Repository
//!
//! Handles all database operations related to execution logs.

use ferry_core::domain::log::{LogEntry, LogLevel};
use sqlx::PgPool;
use uuid::Uuid;

/// Add log entries for an execution
pub async fn add_entries(
    pool: &PgPool,
    execution_id: Uuid,
    entries: &[LogEntry],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (execution_id, timestamp, level, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(execution_id)
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Get all log entries for an execution, in append order
pub async fn find_by_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, message
        FROM execution_logs
        WHERE execution_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            level: LogLevel::from_name(&row.level),
            message: row.message,
        }
    }
}
