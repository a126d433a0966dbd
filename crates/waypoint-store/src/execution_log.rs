//! Query execution audit log.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::QueryExecutionLog;

/// Snippet cap stored per row (2 KB).
pub const MAX_SNIPPET_BYTES: usize = 2 * 1024;
/// Error message cap stored per row (1 KB).
pub const MAX_ERROR_BYTES: usize = 1024;

const SELECT_COLUMNS: &str =
    "id, user_id, code_snippet, success, error_message, execution_time_ms, created_at";

/// Fields for one audit row.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub user_id: Uuid,
    pub code: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
}

/// Append one audit row; code and error are truncated to their caps.
///
/// # Errors
/// Returns error on database failure.
pub async fn record(pool: &SqlitePool, log: NewExecutionLog) -> StoreResult<()> {
    sqlx::query(
        r"
        INSERT INTO query_execution_logs
            (id, user_id, code_snippet, success, error_message, execution_time_ms, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(Uuid::new_v4())
    .bind(log.user_id)
    .bind(truncate_utf8(&log.code, MAX_SNIPPET_BYTES))
    .bind(log.success)
    .bind(log.error_message.as_deref().map(|e| truncate_utf8(e, MAX_ERROR_BYTES)))
    .bind(log.execution_time_ms)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Recent rows for a user, newest first (admin pagination).
///
/// # Errors
/// Returns error on database failure.
pub async fn list_recent(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<QueryExecutionLog>> {
    Ok(sqlx::query_as::<_, QueryExecutionLog>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM query_execution_logs
        WHERE user_id = ?
        ORDER BY created_at DESC
        LIMIT ? OFFSET ?
        "
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?)
}

/// Number of rows for a user since an instant (test and diagnostics aid).
///
/// # Errors
/// Returns error on database failure.
pub async fn count_since(
    pool: &SqlitePool,
    user_id: Uuid,
    since: chrono::DateTime<Utc>,
) -> StoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM query_execution_logs WHERE user_id = ? AND created_at >= ?",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Cut a string at a byte budget without splitting a UTF-8 character.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
