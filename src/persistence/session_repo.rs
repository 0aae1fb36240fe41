//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    job_id: String,
    status: String,
    action_count: i64,
    action_limit: i64,
    error_count: i64,
    error_limit: i64,
    warning_count: i64,
    warning_limit: i64,
    timeout_seconds: i64,
    log_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            status: parse_session_status(&self.status)?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            id: self.id,
            job_id: self.job_id,
            action_count: self.action_count,
            action_limit: self.action_limit,
            error_count: self.error_count,
            error_limit: self.error_limit,
            warning_count: self.warning_count,
            warning_limit: self.warning_limit,
            timeout_seconds: self.timeout_seconds,
            log_path: self.log_path,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Parse a persisted status string back into the enum.
///
/// # Errors
///
/// Returns `AppError::Db` on an unrecognized status value.
pub fn parse_session_status(s: &str) -> Result<SessionStatus> {
    match s {
        "ready_for_assessment" => Ok(SessionStatus::ReadyForAssessment),
        "assessing_controls" => Ok(SessionStatus::AssessingControls),
        "submitted_for_review" => Ok(SessionStatus::SubmittedForReview),
        "completed" => Ok(SessionStatus::Completed),
        "abandoned" => Ok(SessionStatus::Abandoned),
        "failed" => Ok(SessionStatus::Failed),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let mut conn = self.db.acquire().await?;
        create_in(&mut conn, session).await?;
        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Session> {
        let mut conn = self.db.acquire().await?;
        fetch_in(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    /// List all sessions currently in the given status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE status = ?1")
            .bind(status.as_str())
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Record the agent log file location for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_log_path(&self, id: &str, log_path: &str) -> Result<()> {
        sqlx::query("UPDATE session SET log_path = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(log_path)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete a session, detaching (not deleting) its findings.
    ///
    /// Refused while any queue entry still references the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Forbidden` if a queue entry references the
    /// session, or `AppError::Db` on query failure.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (refs,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM execution_queue WHERE session_id = ?1")
                .bind(id)
                .fetch_one(self.db.as_ref())
                .await?;
        if refs > 0 {
            return Err(AppError::Forbidden(format!(
                "session {id} is still referenced by {refs} queue entr(ies)"
            )));
        }
        sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}

/// Insert a session on an explicit connection (transaction-friendly).
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn create_in(conn: &mut SqliteConnection, session: &Session) -> Result<()> {
    sqlx::query(
        "INSERT INTO session (id, job_id, status, action_count, action_limit,
         error_count, error_limit, warning_count, warning_limit,
         timeout_seconds, log_path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&session.id)
    .bind(&session.job_id)
    .bind(session.status.as_str())
    .bind(session.action_count)
    .bind(session.action_limit)
    .bind(session.error_count)
    .bind(session.error_limit)
    .bind(session.warning_count)
    .bind(session.warning_limit)
    .bind(session.timeout_seconds)
    .bind(&session.log_path)
    .bind(session.created_at.to_rfc3339())
    .bind(session.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Fetch a session on an explicit connection, `None` when absent.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn fetch_in(conn: &mut SqliteConnection, id: &str) -> Result<Option<Session>> {
    let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(SessionRow::into_session).transpose()
}

/// Write a session status on an explicit connection.
///
/// Callers are expected to have validated the transition through
/// [`crate::lifecycle::transition`] first.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn set_status_in(
    conn: &mut SqliteConnection,
    id: &str,
    status: SessionStatus,
) -> Result<()> {
    sqlx::query("UPDATE session SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Atomically consume one action, only while budget remains.
///
/// Returns `false` without mutating when `action_count` has already
/// reached `action_limit` — the race-safe increment-then-check the
/// Action Gate relies on.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn consume_action_in(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE session SET action_count = action_count + 1, updated_at = ?1
         WHERE id = ?2 AND action_count < action_limit",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Increment the session warning counter.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn bump_warning_in(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("UPDATE session SET warning_count = warning_count + 1, updated_at = ?1 WHERE id = ?2")
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Increment the session error counter.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn bump_error_in(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("UPDATE session SET error_count = error_count + 1, updated_at = ?1 WHERE id = ?2")
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}
