//! Evidence repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::evidence::Evidence;
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for evidence records.
#[derive(Clone)]
pub struct EvidenceRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    finding_id: String,
    document_ref: String,
    start_line: i64,
    end_line: i64,
    created_at: String,
}

impl EvidenceRow {
    /// Convert a database row into the domain model.
    fn into_evidence(self) -> Result<Evidence> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Evidence {
            id: self.id,
            finding_id: self.finding_id,
            document_ref: self.document_ref,
            start_line: self.start_line,
            end_line: self.end_line,
            created_at,
        })
    }
}

impl EvidenceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// List a finding's evidence ordered by document and start line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_finding(&self, finding_id: &str) -> Result<Vec<Evidence>> {
        let mut conn = self.db.acquire().await?;
        list_for_finding_in(&mut conn, finding_id).await
    }

    /// Count evidence citations attached to a finding.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_finding(&self, finding_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM evidence WHERE finding_id = ?1")
                .bind(finding_id)
                .fetch_one(self.db.as_ref())
                .await?;
        Ok(count)
    }
}

/// Insert an evidence record on an explicit connection.
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn create_in(conn: &mut SqliteConnection, evidence: &Evidence) -> Result<()> {
    sqlx::query(
        "INSERT INTO evidence (id, finding_id, document_ref, start_line, end_line, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&evidence.id)
    .bind(&evidence.finding_id)
    .bind(&evidence.document_ref)
    .bind(evidence.start_line)
    .bind(evidence.end_line)
    .bind(evidence.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// List a finding's evidence on an explicit connection, ordered by
/// document then start line.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn list_for_finding_in(
    conn: &mut SqliteConnection,
    finding_id: &str,
) -> Result<Vec<Evidence>> {
    let rows: Vec<EvidenceRow> = sqlx::query_as(
        "SELECT * FROM evidence WHERE finding_id = ?1 ORDER BY document_ref, start_line, id",
    )
    .bind(finding_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(EvidenceRow::into_evidence).collect()
}

/// Replace a finding's evidence for one document with a merged set.
///
/// Deletes the originals and inserts the replacements in a single
/// delete-then-insert pass; callers run this inside a transaction.
///
/// # Errors
///
/// Returns `AppError::Db` if any statement fails.
pub async fn replace_for_document_in(
    conn: &mut SqliteConnection,
    finding_id: &str,
    document_ref: &str,
    merged: &[Evidence],
) -> Result<()> {
    sqlx::query("DELETE FROM evidence WHERE finding_id = ?1 AND document_ref = ?2")
        .bind(finding_id)
        .bind(document_ref)
        .execute(&mut *conn)
        .await?;
    for evidence in merged {
        create_in(conn, evidence).await?;
    }
    Ok(())
}
