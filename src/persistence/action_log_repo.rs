//! Action audit log repository. Append-only; rows are never updated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::action_log::{ActionLogEntry, ActionType};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for action log records.
#[derive(Clone)]
pub struct ActionLogRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ActionLogRow {
    id: String,
    session_id: String,
    action_type: String,
    parameters: String,
    result_summary: String,
    created_at: String,
}

impl ActionLogRow {
    /// Convert a database row into the domain model.
    fn into_entry(self) -> Result<ActionLogEntry> {
        let parameters = serde_json::from_str(&self.parameters)
            .map_err(|e| AppError::Db(format!("invalid parameters: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(ActionLogEntry {
            action_type: parse_action_type(&self.action_type)?,
            id: self.id,
            session_id: self.session_id,
            parameters,
            result_summary: self.result_summary,
            created_at,
        })
    }
}

fn parse_action_type(s: &str) -> Result<ActionType> {
    match s {
        "search" => Ok(ActionType::Search),
        "read" => Ok(ActionType::Read),
        "grep" => Ok(ActionType::Grep),
        "add_evidence" => Ok(ActionType::AddEvidence),
        "update_finding" => Ok(ActionType::UpdateFinding),
        other => Err(AppError::Db(format!("invalid action type: {other}"))),
    }
}

impl ActionLogRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// List a session's audit trail in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<ActionLogEntry>> {
        let rows: Vec<ActionLogRow> = sqlx::query_as(
            "SELECT * FROM action_log WHERE session_id = ?1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ActionLogRow::into_entry).collect()
    }

    /// Count audit rows for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_session(&self, session_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM action_log WHERE session_id = ?1")
                .bind(session_id)
                .fetch_one(self.db.as_ref())
                .await?;
        Ok(count)
    }
}

/// Append an audit entry on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn append_in(conn: &mut SqliteConnection, entry: &ActionLogEntry) -> Result<()> {
    let parameters = serde_json::to_string(&entry.parameters)
        .map_err(|e| AppError::Db(format!("serialize parameters: {e}")))?;
    sqlx::query(
        "INSERT INTO action_log (id, session_id, action_type, parameters, result_summary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&entry.id)
    .bind(&entry.session_id)
    .bind(entry.action_type.as_str())
    .bind(&parameters)
    .bind(&entry.result_summary)
    .bind(entry.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}
