//! Per-action authorization gate for agent-facing operations.
//!
//! Every agent action (search, read, grep, add-evidence, update-finding)
//! passes through [`ActionGate::authorize`] before the downstream call
//! and [`ActionGate::commit`] after it. Authorization auto-starts a
//! READY session on its first action and hard-stops a session that has
//! exhausted its action budget by abandoning it. The commit step writes
//! the counter increment and the audit row in one transaction, so a
//! downstream failure never leaves a count without a matching log entry.

use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::lifecycle::{self, Trigger};
use crate::models::action_log::{ActionLogEntry, ActionType};
use crate::models::session::{Session, SessionStatus};
use crate::persistence::{action_log_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

/// Gate guarding all agent-facing actions on a session.
#[derive(Clone)]
pub struct ActionGate {
    db: Arc<SqlitePool>,
}

impl ActionGate {
    /// Create a new gate over the shared pool.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Check that a session may perform another agent action.
    ///
    /// Auto-fires `start` when the session is still READY (first action
    /// implicitly begins work). When the action budget is exhausted the
    /// session is abandoned as a side effect and the call fails — a hard
    /// stop, not a retry. Idempotent on repeated attempts: an already
    /// abandoned session keeps rejecting.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` — session does not exist.
    /// - `AppError::Forbidden` — terminal session, wrong lifecycle
    ///   state, or action limit exceeded.
    pub async fn authorize(&self, session_id: &str) -> Result<Session> {
        let mut tx = self.db.begin().await?;

        let mut session = session_repo::fetch_in(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if matches!(
            session.status,
            SessionStatus::Abandoned | SessionStatus::Failed
        ) {
            return Err(AppError::Forbidden(format!(
                "session {session_id} is terminal ({})",
                session.status.as_str()
            )));
        }

        if session.status == SessionStatus::ReadyForAssessment {
            let next = lifecycle::transition(session.status, Trigger::Start, &[])
                .map_err(|e| AppError::Transition(e.to_string()))?;
            session_repo::set_status_in(&mut tx, session_id, next).await?;
            session.status = next;
            info!(session_id, "session auto-started on first action");
        }

        if session.status != SessionStatus::AssessingControls {
            return Err(AppError::Forbidden(format!(
                "session {session_id} is not assessing ({})",
                session.status.as_str()
            )));
        }

        if session.action_limit_reached() {
            let next = lifecycle::transition(session.status, Trigger::Abandon, &[])
                .map_err(|e| AppError::Transition(e.to_string()))?;
            session_repo::set_status_in(&mut tx, session_id, next).await?;
            tx.commit().await?;
            warn!(
                session_id,
                action_count = session.action_count,
                action_limit = session.action_limit,
                "action limit exceeded, session abandoned"
            );
            return Err(AppError::Forbidden(format!(
                "session {session_id} action limit exceeded ({}/{})",
                session.action_count, session.action_limit
            )));
        }

        tx.commit().await?;
        Ok(session)
    }

    /// Record a completed action: counter increment plus audit row.
    ///
    /// Call only after the downstream call has returned. Runs in its own
    /// transaction; see [`commit_in`] for embedding into a larger write
    /// transaction (evidence/finding mutations).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Forbidden` if the budget was exhausted by a
    /// concurrent action, or `AppError::Db` on persistence failure.
    pub async fn commit(
        &self,
        session_id: &str,
        action_type: ActionType,
        parameters: serde_json::Value,
        result_summary: &str,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        match commit_in(&mut tx, session_id, action_type, parameters, result_summary).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            // The race loser marked the session abandoned; that write
            // must survive even though the action itself failed.
            Err(err @ AppError::Forbidden(_)) => {
                tx.commit().await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

/// Transactional core of [`ActionGate::commit`].
///
/// The conditional increment (`action_count < action_limit`) makes the
/// budget check race-safe even when multiple callers hit the same
/// session concurrently: the loser of the race observes zero affected
/// rows, abandons the session, and fails.
///
/// # Errors
///
/// Returns `AppError::Forbidden` when the budget is already exhausted,
/// or `AppError::Db` on persistence failure.
pub async fn commit_in(
    conn: &mut SqliteConnection,
    session_id: &str,
    action_type: ActionType,
    parameters: serde_json::Value,
    result_summary: &str,
) -> Result<()> {
    let consumed = session_repo::consume_action_in(conn, session_id).await?;
    if !consumed {
        session_repo::set_status_in(conn, session_id, SessionStatus::Abandoned).await?;
        return Err(AppError::Forbidden(format!(
            "session {session_id} action limit exceeded"
        )));
    }

    let entry = ActionLogEntry::new(
        session_id.to_owned(),
        action_type,
        parameters,
        result_summary.to_owned(),
    );
    action_log_repo::append_in(conn, &entry).await?;
    Ok(())
}
