//! Stall recovery sweep.
//!
//! Periodically finds sessions that exceeded their timeout or action
//! budget while still assessing, forces them through
//! abandon → placeholder judgements → submit so they land in review
//! instead of disappearing, completes their queue entries, and
//! retriggers the scheduler once per affected job. No session — and no
//! queue entry — stays stuck even if an agent hangs or crashes without
//! signaling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::lifecycle::{self, Trigger};
use crate::models::finding::Judgement;
use crate::models::queue::QueueStatus;
use crate::models::session::{Session, SessionStatus};
use crate::persistence::{finding_repo, queue_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

use super::scheduler::Scheduler;

/// Comment written to findings the sweep judges on the agent's behalf.
const PLACEHOLDER_COMMENT: &str =
    "No assessment was recorded before the session stalled; judged not applicable by the system.";

/// Recover one stalled session.
///
/// In one transaction: re-verify the session is still stalled, fire
/// `abandon`, backfill `NotApplicable` placeholder judgements on every
/// unjudged finding, fire the recovery `submit` (guard passes now that
/// all findings are judged), and mark the queue entry COMPLETED.
///
/// Returns `false` without mutating when the session is no longer
/// stalled by the time the transaction sees it.
///
/// # Errors
///
/// Returns `AppError::Db` on persistence failure, or
/// `AppError::Transition` if the lifecycle table refuses the recovery
/// path (which indicates a bug, not an operational condition).
pub async fn recover_session(db: &Arc<SqlitePool>, session_id: &str) -> Result<bool> {
    let mut tx = db.begin().await?;

    let Some(session) = session_repo::fetch_in(&mut tx, session_id).await? else {
        return Ok(false);
    };
    if !session.is_stalled(Utc::now()) {
        return Ok(false);
    }

    let abandoned = lifecycle::transition(session.status, Trigger::Abandon, &[])
        .map_err(|e| AppError::Transition(e.to_string()))?;
    session_repo::set_status_in(&mut tx, session_id, abandoned).await?;

    let unjudged = finding_repo::list_unjudged_for_session_in(&mut tx, session_id).await?;
    for finding in &unjudged {
        finding_repo::set_judgement_in(
            &mut tx,
            &finding.id,
            Judgement::NotApplicable,
            Some(PLACEHOLDER_COMMENT),
        )
        .await?;
    }

    let snapshots = finding_repo::snapshots_for_session_in(&mut tx, session_id).await?;
    let submitted = lifecycle::transition(abandoned, Trigger::Submit, &snapshots)
        .map_err(|e| AppError::Transition(e.to_string()))?;
    session_repo::set_status_in(&mut tx, session_id, submitted).await?;

    if let Some(entry) = queue_repo::fetch_by_session_in(&mut tx, session_id).await? {
        queue_repo::set_status_in(&mut tx, &entry.id, QueueStatus::Completed).await?;
    }

    tx.commit().await?;

    warn!(
        session_id,
        placeholders = unjudged.len(),
        "stalled session recovered into review"
    );
    Ok(true)
}

/// Sweep one job's stalled sessions. Returns how many were recovered.
///
/// # Errors
///
/// Returns `AppError::Db` on persistence failure.
pub async fn sweep_job(db: &Arc<SqlitePool>, job_id: &str) -> Result<usize> {
    let rows: Vec<Session> = {
        let repo = session_repo::SessionRepo::new(Arc::clone(db));
        repo.list_by_status(SessionStatus::AssessingControls)
            .await?
            .into_iter()
            .filter(|s| s.job_id == job_id)
            .collect()
    };

    let now = Utc::now();
    let mut recovered = 0;
    for session in rows {
        if session.is_stalled(now) && recover_session(db, &session.id).await? {
            recovered += 1;
        }
    }
    Ok(recovered)
}

/// Sweep every job with stalled sessions. Returns the affected job ids.
///
/// # Errors
///
/// Returns `AppError::Db` on persistence failure.
pub async fn sweep(db: &Arc<SqlitePool>) -> Result<Vec<String>> {
    let assessing = session_repo::SessionRepo::new(Arc::clone(db))
        .list_by_status(SessionStatus::AssessingControls)
        .await?;

    let now = Utc::now();
    let mut job_ids: Vec<String> = assessing
        .iter()
        .filter(|s| s.is_stalled(now))
        .map(|s| s.job_id.clone())
        .collect();
    job_ids.sort();
    job_ids.dedup();

    let mut affected = Vec::new();
    for job_id in job_ids {
        let recovered = sweep_job(db, &job_id).await?;
        if recovered > 0 {
            affected.push(job_id);
        }
    }
    Ok(affected)
}

/// Spawn the periodic stall-recovery task.
///
/// Each tick sweeps all jobs and calls `schedule_next` once per job
/// that had recoveries, keeping the pipeline moving. Stops when the
/// `CancellationToken` fires.
#[must_use]
pub fn spawn_stall_sweep(
    db: Arc<SqlitePool>,
    scheduler: Scheduler,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("stall sweep shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match sweep(&db).await {
                    Ok(affected) => {
                        for job_id in affected {
                            if let Err(err) = scheduler.schedule_next().await {
                                error!(job_id, %err, "post-recovery reschedule failed");
                            }
                        }
                    }
                    Err(err) => error!(%err, "stall sweep failed"),
                }
            }
        }
        .instrument(info_span!("stall_sweep")),
    )
}
