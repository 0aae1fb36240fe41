//! Review lifecycle services: submit, reject, complete, force-fail,
//! and administrative requeue.
//!
//! Each operation validates its trigger through the pure lifecycle
//! table and persists the result in one transaction; a failing guard
//! surfaces the offending findings and never half-transitions.

use std::sync::Arc;

use tracing::{info, warn};

use crate::lifecycle::{self, Trigger, TransitionError};
use crate::models::queue::{ExecutionConfig, QueueEntry, QueueStatus};
use crate::models::session::{Session, SessionStatus};
use crate::persistence::{finding_repo, queue_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

fn map_transition_error(err: TransitionError) -> AppError {
    match err {
        TransitionError::IncompleteSubmission(_) => AppError::Validation(err.to_string()),
        TransitionError::InvalidTrigger { .. } => AppError::Transition(err.to_string()),
    }
}

/// Fire a lifecycle trigger on a session and persist the new status.
///
/// The `submit` guard loads a consistent snapshot of the session's
/// findings and their evidence counts inside the same transaction.
///
/// # Errors
///
/// - `AppError::NotFound` — session does not exist.
/// - `AppError::Validation` — submit guard failed; message names every
///   finding missing a judgement and every finding judged without
///   evidence, distinctly.
/// - `AppError::Transition` — trigger not valid from the current state.
pub async fn fire_trigger(
    db: &Arc<SqlitePool>,
    session_id: &str,
    trigger: Trigger,
) -> Result<Session> {
    let mut tx = db.begin().await?;

    let mut session = session_repo::fetch_in(&mut tx, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

    let snapshots = if trigger == Trigger::Submit {
        finding_repo::snapshots_for_session_in(&mut tx, session_id).await?
    } else {
        Vec::new()
    };

    let next = lifecycle::transition(session.status, trigger, &snapshots)
        .map_err(map_transition_error)?;
    session_repo::set_status_in(&mut tx, session_id, next).await?;
    tx.commit().await?;

    info!(
        session_id,
        from = session.status.as_str(),
        to = next.as_str(),
        "session transitioned"
    );
    session.status = next;
    Ok(session)
}

/// Submit a session's completed work for human review.
///
/// # Errors
///
/// See [`fire_trigger`]; the submit guard failure names the offending
/// findings.
pub async fn submit_session_for_review(db: &Arc<SqlitePool>, session_id: &str) -> Result<Session> {
    fire_trigger(db, session_id, Trigger::Submit).await
}

/// Send a submitted session back for rework.
///
/// # Errors
///
/// See [`fire_trigger`].
pub async fn reject_session_submission(db: &Arc<SqlitePool>, session_id: &str) -> Result<Session> {
    fire_trigger(db, session_id, Trigger::Reject).await
}

/// Accept a submitted session; terminal.
///
/// # Errors
///
/// See [`fire_trigger`].
pub async fn complete_session_review(db: &Arc<SqlitePool>, session_id: &str) -> Result<Session> {
    fire_trigger(db, session_id, Trigger::Complete).await
}

/// Force a session into FAILED from any state.
///
/// # Errors
///
/// See [`fire_trigger`].
pub async fn force_fail_session(db: &Arc<SqlitePool>, session_id: &str) -> Result<Session> {
    fire_trigger(db, session_id, Trigger::ForceFail).await
}

/// Administratively requeue every session currently in one of `states`.
///
/// For each matching session: delete its queue entry, reset the session
/// to READY_FOR_ASSESSMENT (an operator reset outside the trigger
/// table; counters are kept), and insert a fresh PENDING entry carrying
/// `execution_config` — or the previous entry's config when none is
/// given. A session whose queue entry is still PROCESSING is skipped:
/// an agent is live for it, and re-pending would let the scheduler
/// launch a second one. Returns the requeued sessions.
///
/// # Errors
///
/// Returns `AppError::Db` on persistence failure.
pub async fn requeue_sessions_by_states(
    db: &Arc<SqlitePool>,
    states: &[SessionStatus],
    execution_config: Option<ExecutionConfig>,
) -> Result<Vec<Session>> {
    let repo = session_repo::SessionRepo::new(Arc::clone(db));
    let mut candidates = Vec::new();
    for state in states {
        candidates.extend(repo.list_by_status(*state).await?);
    }

    let mut requeued = Vec::with_capacity(candidates.len());
    for mut session in candidates {
        let mut tx = db.begin().await?;

        let previous = queue_repo::fetch_by_session_in(&mut tx, &session.id).await?;
        if previous
            .as_ref()
            .is_some_and(|entry| entry.status == QueueStatus::Processing)
        {
            warn!(session_id = session.id, "requeue skipped: execution in flight");
            continue;
        }
        queue_repo::delete_for_session_in(&mut tx, &session.id).await?;
        session_repo::set_status_in(&mut tx, &session.id, SessionStatus::ReadyForAssessment)
            .await?;

        let config = execution_config
            .clone()
            .or_else(|| previous.map(|entry| entry.execution_config))
            .unwrap_or_default();
        let entry = QueueEntry::new(session.id.clone(), session.job_id.clone(), 0, config);
        queue_repo::create_in(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(session_id = session.id, "session requeued");
        session.status = SessionStatus::ReadyForAssessment;
        requeued.push(session);
    }

    Ok(requeued)
}
