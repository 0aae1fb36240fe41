//! Evidence model: a cited document line-range supporting a judgement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Evidence domain entity persisted in `SQLite`.
///
/// Line numbers are 1-indexed and inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Evidence {
    /// Unique record identifier.
    pub id: String,
    /// Owning finding.
    pub finding_id: String,
    /// Document reference within the job's corpus.
    pub document_ref: String,
    /// First cited line (1-indexed, inclusive).
    pub start_line: i64,
    /// Last cited line (1-indexed, inclusive).
    pub end_line: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Construct an evidence citation with a generated identifier.
    #[must_use]
    pub fn new(finding_id: String, document_ref: String, start_line: i64, end_line: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            finding_id,
            document_ref,
            start_line,
            end_line,
            created_at: Utc::now(),
        }
    }
}
