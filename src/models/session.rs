//! Session model: a bounded unit of agent work over a fixed findings batch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an assessment session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created; waiting for the scheduler to dispatch it.
    ReadyForAssessment,
    /// Agent is actively working through the assigned findings.
    AssessingControls,
    /// All findings judged; awaiting human review.
    SubmittedForReview,
    /// Review accepted; terminal.
    Completed,
    /// Forced out of assessment by action-limit or stall; terminal.
    Abandoned,
    /// Explicitly force-failed or agent process failed; terminal.
    Failed,
}

impl SessionStatus {
    /// Whether this status admits no further work (terminal states).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Failed)
    }

    /// Stable string form persisted in the `session.status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadyForAssessment => "ready_for_assessment",
            Self::AssessingControls => "assessing_controls",
            Self::SubmittedForReview => "submitted_for_review",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }
}

/// Resource limits applied to a session at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum agent actions before forced abandonment.
    pub action_limit: i64,
    /// Maximum recorded errors before the session is flagged.
    pub error_limit: i64,
    /// Maximum recorded warnings before the session is flagged.
    pub warning_limit: i64,
    /// Business-level staleness horizon in seconds.
    pub timeout_seconds: i64,
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Owning job; immutable after creation.
    pub job_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Agent actions consumed so far.
    pub action_count: i64,
    /// Maximum agent actions before forced abandonment.
    pub action_limit: i64,
    /// Errors recorded against the session.
    pub error_count: i64,
    /// Maximum errors tolerated.
    pub error_limit: i64,
    /// Warnings recorded against the session.
    pub warning_count: i64,
    /// Maximum warnings tolerated.
    pub warning_limit: i64,
    /// Business-level staleness horizon in seconds.
    pub timeout_seconds: i64,
    /// Agent process log location, set once the runner starts.
    pub log_path: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new session in `ReadyForAssessment` with a generated id.
    #[must_use]
    pub fn new(job_id: String, limits: SessionLimits) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            status: SessionStatus::ReadyForAssessment,
            action_count: 0,
            action_limit: limits.action_limit,
            error_count: 0,
            error_limit: limits.error_limit,
            warning_count: 0,
            warning_limit: limits.warning_limit,
            timeout_seconds: limits.timeout_seconds,
            log_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session has exhausted its action budget.
    #[must_use]
    pub fn action_limit_reached(&self) -> bool {
        self.action_count >= self.action_limit
    }

    /// Whether the session has outlived its configured staleness horizon.
    #[must_use]
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + Duration::seconds(self.timeout_seconds)
    }

    /// Whether the session counts as stalled at `now` (timeout or budget).
    #[must_use]
    pub fn is_stalled(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::AssessingControls
            && (self.timed_out(now) || self.action_limit_reached())
    }
}
