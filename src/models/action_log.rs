//! Append-only action audit record. Never mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent-facing action kinds recorded in the audit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Corpus semantic search.
    Search,
    /// Document line-range read.
    Read,
    /// Corpus pattern match.
    Grep,
    /// Evidence citation added to a finding.
    AddEvidence,
    /// Judgement or comment written to a finding.
    UpdateFinding,
}

impl ActionType {
    /// Stable string form persisted in the `action_log.action_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Read => "read",
            Self::Grep => "grep",
            Self::AddEvidence => "add_evidence",
            Self::UpdateFinding => "update_finding",
        }
    }
}

/// One audited agent action against a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ActionLogEntry {
    /// Unique record identifier.
    pub id: String,
    /// Session the action ran against.
    pub session_id: String,
    /// Action kind.
    pub action_type: ActionType,
    /// Full parameter set, retained verbatim for audit.
    pub parameters: serde_json::Value,
    /// Result summary (hit count, lines read, match count).
    pub result_summary: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ActionLogEntry {
    /// Construct an audit entry with a generated identifier.
    #[must_use]
    pub fn new(
        session_id: String,
        action_type: ActionType,
        parameters: serde_json::Value,
        result_summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            action_type,
            parameters,
            result_summary,
            created_at: Utc::now(),
        }
    }
}
