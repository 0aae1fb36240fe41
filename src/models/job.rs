//! Job model: a framework assessment run over one document corpus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an assessment job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Findings created, no session carved out yet.
    Pending,
    /// At least one assessment session has been created.
    Assessing,
    /// All findings reviewed; terminal.
    Completed,
}

impl JobStatus {
    /// Stable string form persisted in the `job.status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assessing => "assessing",
            Self::Completed => "completed",
        }
    }
}

/// Job domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Job {
    /// Unique record identifier.
    pub id: String,
    /// Human-readable job name.
    pub name: String,
    /// Knowledge-backend corpus this job assesses.
    pub corpus_id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Construct a new pending job with a generated identifier.
    #[must_use]
    pub fn new(name: String, corpus_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            corpus_id,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
