//! Execution queue entry: the dispatch record pairing a session with its
//! execution configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch status for a queue entry.
///
/// `Processing → Pending` is a valid recovery transition used by the
/// dispatch-failure rollback and startup crash recovery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the scheduler.
    Pending,
    /// Claimed by the scheduler; at most one entry system-wide.
    Processing,
    /// Dispatch cycle finished; terminal.
    Completed,
}

impl QueueStatus {
    /// Stable string form persisted in the `execution_queue.status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

/// Opaque execution configuration handed through to the Process Runner.
///
/// Stored as a JSON blob on the queue entry and never interpreted by the
/// scheduler itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Agent program flavor (e.g. `claude`, `codex`).
    pub agent_kind: Option<String>,
    /// Model identifier override.
    pub model: Option<String>,
    /// Model API credential override; falls back to the server credential.
    pub api_key: Option<String>,
    /// Full prompt override; replaces the rendered task prompt.
    pub prompt_override: Option<String>,
}

/// Execution queue domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueEntry {
    /// Unique record identifier.
    pub id: String,
    /// Session this entry dispatches.
    pub session_id: String,
    /// Owning job, denormalized for job-scoped sweeps.
    pub job_id: String,
    /// Current dispatch status.
    pub status: QueueStatus,
    /// Tie-break ordering; insertion order remains primary.
    pub priority: i64,
    /// Opaque execution configuration.
    pub execution_config: ExecutionConfig,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Construct a pending entry with a generated identifier.
    #[must_use]
    pub fn new(
        session_id: String,
        job_id: String,
        priority: i64,
        execution_config: ExecutionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            job_id,
            status: QueueStatus::Pending,
            priority,
            execution_config,
            created_at: now,
            updated_at: now,
        }
    }
}
