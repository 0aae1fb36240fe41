//! Execution queue repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::queue::{ExecutionConfig, QueueEntry, QueueStatus};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for execution queue entries.
#[derive(Clone)]
pub struct QueueRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    session_id: String,
    job_id: String,
    status: String,
    priority: i64,
    execution_config: String,
    created_at: String,
    updated_at: String,
}

impl QueueRow {
    /// Convert a database row into the domain model.
    fn into_entry(self) -> Result<QueueEntry> {
        let execution_config: ExecutionConfig = serde_json::from_str(&self.execution_config)
            .map_err(|e| AppError::Db(format!("invalid execution_config: {e}")))?;
        Ok(QueueEntry {
            status: parse_queue_status(&self.status)?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            id: self.id,
            session_id: self.session_id,
            job_id: self.job_id,
            priority: self.priority,
            execution_config,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Parse a persisted queue status string back into the enum.
///
/// # Errors
///
/// Returns `AppError::Db` on an unrecognized status value.
pub fn parse_queue_status(s: &str) -> Result<QueueStatus> {
    match s {
        "pending" => Ok(QueueStatus::Pending),
        "processing" => Ok(QueueStatus::Processing),
        "completed" => Ok(QueueStatus::Completed),
        other => Err(AppError::Db(format!("invalid queue status: {other}"))),
    }
}

impl QueueRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new queue entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let mut conn = self.db.acquire().await?;
        create_in(&mut conn, entry).await?;
        Ok(entry.clone())
    }

    /// Retrieve a queue entry by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the entry does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<QueueEntry> {
        let row: Option<QueueRow> = sqlx::query_as("SELECT * FROM execution_queue WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(QueueRow::into_entry)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id} not found")))
    }

    /// Retrieve the queue entry for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_session(&self, session_id: &str) -> Result<Option<QueueEntry>> {
        let mut conn = self.db.acquire().await?;
        fetch_by_session_in(&mut conn, session_id).await
    }

    /// Count entries currently in `processing`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_processing(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM execution_queue WHERE status = 'processing'")
                .fetch_one(self.db.as_ref())
                .await?;
        Ok(count)
    }

    /// List entries in a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM execution_queue WHERE status = ?1 ORDER BY created_at, id",
        )
        .bind(status.as_str())
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(QueueRow::into_entry).collect()
    }
}

/// Insert a queue entry on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn create_in(conn: &mut SqliteConnection, entry: &QueueEntry) -> Result<()> {
    let execution_config = serde_json::to_string(&entry.execution_config)
        .map_err(|e| AppError::Db(format!("serialize execution_config: {e}")))?;
    sqlx::query(
        "INSERT INTO execution_queue (id, session_id, job_id, status, priority,
         execution_config, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&entry.id)
    .bind(&entry.session_id)
    .bind(&entry.job_id)
    .bind(entry.status.as_str())
    .bind(entry.priority)
    .bind(&execution_config)
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Fetch the queue entry for a session on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn fetch_by_session_in(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<Option<QueueEntry>> {
    let row: Option<QueueRow> =
        sqlx::query_as("SELECT * FROM execution_queue WHERE session_id = ?1 LIMIT 1")
            .bind(session_id)
            .fetch_optional(conn)
            .await?;
    row.map(QueueRow::into_entry).transpose()
}

/// Atomically claim the next dispatchable entry.
///
/// Promotes the oldest `pending` entry (insertion order primary,
/// priority as tie-break) to `processing`, but only when no entry is
/// currently `processing` — the whole read-modify-write is one
/// statement, so concurrent schedulers cannot double-claim.
///
/// Returns `None` when an entry is already processing or the queue is
/// empty.
///
/// # Errors
///
/// Returns `AppError::Db` if the statement fails.
pub async fn claim_next_in(conn: &mut SqliteConnection) -> Result<Option<QueueEntry>> {
    let row: Option<QueueRow> = sqlx::query_as(
        "UPDATE execution_queue SET status = 'processing', updated_at = ?1
         WHERE id = (
             SELECT id FROM execution_queue
             WHERE status = 'pending'
               AND NOT EXISTS (SELECT 1 FROM execution_queue WHERE status = 'processing')
             ORDER BY created_at ASC, priority DESC, id ASC
             LIMIT 1
         )
         RETURNING *",
    )
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(conn)
    .await?;
    row.map(QueueRow::into_entry).transpose()
}

/// Write a queue entry status on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn set_status_in(
    conn: &mut SqliteConnection,
    id: &str,
    status: QueueStatus,
) -> Result<()> {
    sqlx::query("UPDATE execution_queue SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Mark an entry `completed` only if it is still `processing`.
///
/// Returns whether the row was transitioned.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn complete_if_processing_in(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE execution_queue SET status = 'completed', updated_at = ?1
         WHERE id = ?2 AND status = 'processing'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete any queue entry referencing a session.
///
/// # Errors
///
/// Returns `AppError::Db` if the delete fails.
pub async fn delete_for_session_in(conn: &mut SqliteConnection, session_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM execution_queue WHERE session_id = ?1")
        .bind(session_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// List every `processing` entry on an explicit connection, oldest
/// first.
///
/// Startup crash recovery walks these to decide, per entry, whether the
/// execution can be re-queued or must be settled.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn list_processing_in(conn: &mut SqliteConnection) -> Result<Vec<QueueEntry>> {
    let rows: Vec<QueueRow> = sqlx::query_as(
        "SELECT * FROM execution_queue WHERE status = 'processing' ORDER BY created_at, id",
    )
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(QueueRow::into_entry).collect()
}
