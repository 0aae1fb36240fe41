//! Finding repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::lifecycle::FindingSnapshot;
use crate::models::finding::{Finding, Judgement};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for finding records.
#[derive(Clone)]
pub struct FindingRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct FindingRow {
    id: String,
    job_id: String,
    control_item_id: String,
    session_id: Option<String>,
    judgement: Option<String>,
    comment: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FindingRow {
    /// Convert a database row into the domain model.
    fn into_finding(self) -> Result<Finding> {
        Ok(Finding {
            judgement: self.judgement.as_deref().map(parse_judgement).transpose()?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            id: self.id,
            job_id: self.job_id,
            control_item_id: self.control_item_id,
            session_id: self.session_id,
            comment: self.comment,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Parse a persisted judgement string back into the enum.
///
/// # Errors
///
/// Returns `AppError::Db` on an unrecognized judgement value.
pub fn parse_judgement(s: &str) -> Result<Judgement> {
    match s {
        "conformant" => Ok(Judgement::Conformant),
        "non_conformant" => Ok(Judgement::NonConformant),
        "partially_conformant" => Ok(Judgement::PartiallyConformant),
        "not_applicable" => Ok(Judgement::NotApplicable),
        "unconfirmed" => Ok(Judgement::Unconfirmed),
        other => Err(AppError::Db(format!("invalid judgement: {other}"))),
    }
}

impl FindingRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new finding record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, finding: &Finding) -> Result<Finding> {
        sqlx::query(
            "INSERT INTO finding (id, job_id, control_item_id, session_id,
             judgement, comment, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&finding.id)
        .bind(&finding.job_id)
        .bind(&finding.control_item_id)
        .bind(&finding.session_id)
        .bind(finding.judgement.map(Judgement::as_str))
        .bind(&finding.comment)
        .bind(finding.created_at.to_rfc3339())
        .bind(finding.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(finding.clone())
    }

    /// Retrieve a finding by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the finding does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Finding> {
        let row: Option<FindingRow> = sqlx::query_as("SELECT * FROM finding WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(FindingRow::into_finding)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("finding {id} not found")))
    }

    /// List the findings assigned to a session, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Finding>> {
        let rows: Vec<FindingRow> =
            sqlx::query_as("SELECT * FROM finding WHERE session_id = ?1 ORDER BY created_at, id")
                .bind(session_id)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(FindingRow::into_finding).collect()
    }

    /// List unassigned findings for a job (`session_id IS NULL`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_unassigned_for_job(&self, job_id: &str) -> Result<Vec<Finding>> {
        let mut conn = self.db.acquire().await?;
        list_unassigned_in(&mut conn, job_id, i64::MAX).await
    }
}

/// Select up to `limit` unassigned findings for a job on an explicit
/// connection, in creation order.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn list_unassigned_in(
    conn: &mut SqliteConnection,
    job_id: &str,
    limit: i64,
) -> Result<Vec<Finding>> {
    let rows: Vec<FindingRow> = sqlx::query_as(
        "SELECT * FROM finding WHERE job_id = ?1 AND session_id IS NULL
         ORDER BY created_at, id LIMIT ?2",
    )
    .bind(job_id)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(FindingRow::into_finding).collect()
}

/// Assign a finding to a session on an explicit connection.
///
/// Only takes effect while the finding is unassigned, preserving the
/// one-non-terminal-session-per-finding invariant; returns whether the
/// row was claimed.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn assign_session_in(
    conn: &mut SqliteConnection,
    finding_id: &str,
    session_id: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE finding SET session_id = ?1, updated_at = ?2
         WHERE id = ?3 AND session_id IS NULL",
    )
    .bind(session_id)
    .bind(Utc::now().to_rfc3339())
    .bind(finding_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Fetch a finding on an explicit connection, `None` when absent.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn fetch_in(conn: &mut SqliteConnection, id: &str) -> Result<Option<Finding>> {
    let row: Option<FindingRow> = sqlx::query_as("SELECT * FROM finding WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(FindingRow::into_finding).transpose()
}

/// Write judgement and comment on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn set_judgement_in(
    conn: &mut SqliteConnection,
    id: &str,
    judgement: Judgement,
    comment: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE finding SET judgement = ?1, comment = ?2, updated_at = ?3 WHERE id = ?4")
        .bind(judgement.as_str())
        .bind(comment)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Load submit-guard snapshots for every finding assigned to a session.
///
/// Each snapshot carries the judgement flags plus the live evidence
/// count, computed in one query so the guard sees a consistent view.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn snapshots_for_session_in(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<Vec<FindingSnapshot>> {
    let rows: Vec<(String, Option<String>, i64)> = sqlx::query_as(
        "SELECT f.control_item_id, f.judgement,
                (SELECT COUNT(*) FROM evidence e WHERE e.finding_id = f.id) AS evidence_count
         FROM finding f WHERE f.session_id = ?1 ORDER BY f.created_at, f.id",
    )
    .bind(session_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|(control_item_id, judgement, evidence_count)| {
            let judgement = judgement.as_deref().map(parse_judgement).transpose()?;
            Ok(FindingSnapshot {
                control_item_id,
                judged: judgement.is_some(),
                needs_evidence: judgement.is_some_and(Judgement::requires_evidence),
                evidence_count,
            })
        })
        .collect()
}

/// List findings assigned to a session that still lack a judgement.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn list_unjudged_for_session_in(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<Vec<Finding>> {
    let rows: Vec<FindingRow> = sqlx::query_as(
        "SELECT * FROM finding WHERE session_id = ?1 AND judgement IS NULL
         ORDER BY created_at, id",
    )
    .bind(session_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(FindingRow::into_finding).collect()
}
