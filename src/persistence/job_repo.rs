//! Job repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::job::{Job, JobStatus};
use crate::{AppError, Result};

use super::SqlitePool;

/// Repository wrapper around `SQLite` for job records.
#[derive(Clone)]
pub struct JobRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    corpus_id: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    /// Convert a database row into the domain model.
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            status: parse_job_status(&self.status)?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            id: self.id,
            name: self.name,
            corpus_id: self.corpus_id,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn parse_job_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "assessing" => Ok(JobStatus::Assessing),
        "completed" => Ok(JobStatus::Completed),
        other => Err(AppError::Db(format!("invalid job status: {other}"))),
    }
}

impl JobRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new job record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, job: &Job) -> Result<Job> {
        sqlx::query(
            "INSERT INTO job (id, name, corpus_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.corpus_id)
        .bind(job.status.as_str())
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(job.clone())
    }

    /// Retrieve a job by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the job does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Job> {
        let mut conn = self.db.acquire().await?;
        fetch_in(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))
    }

    /// Delete a job, cascading to its sessions and findings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM job WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}

/// Fetch a job on an explicit connection, `None` when absent.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn fetch_in(conn: &mut SqliteConnection, id: &str) -> Result<Option<Job>> {
    let row: Option<JobRow> = sqlx::query_as("SELECT * FROM job WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(JobRow::into_job).transpose()
}

/// Flip a pending job to `assessing` on first session creation.
///
/// No-op when the job has already left `pending`.
///
/// # Errors
///
/// Returns `AppError::Db` if the update fails.
pub async fn mark_assessing_in(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE job SET status = 'assessing', updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
