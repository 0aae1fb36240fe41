//! Single-flight execution scheduler.
//!
//! `schedule_next` promotes at most one PENDING queue entry to
//! PROCESSING at a time, fires the session's `start` transition in the
//! same transaction, and only then hands off to the [`WorkDispatcher`].
//! Marking PROCESSING and launching the worker cannot be one atomic
//! unit, so a failed handoff rolls the claim back in a fresh
//! transaction — the queue is never left permanently stuck.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::lifecycle::{self, Trigger};
use crate::models::queue::{QueueEntry, QueueStatus};
use crate::models::session::SessionStatus;
use crate::persistence::{queue_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

use super::dispatch::WorkDispatcher;

/// Outcome of one `schedule_next` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A session was claimed and handed to the dispatcher.
    Dispatched {
        /// The dispatched session.
        session_id: String,
    },
    /// Nothing dispatched: an entry is already processing, or the
    /// queue is empty.
    Idle,
}

/// Single-flight dispatcher over the execution queue.
#[derive(Clone)]
pub struct Scheduler {
    db: Arc<SqlitePool>,
    dispatcher: Arc<dyn WorkDispatcher>,
}

impl Scheduler {
    /// Create a scheduler over the shared pool and dispatch transport.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>, dispatcher: Arc<dyn WorkDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Claim and dispatch the next queue entry, if any.
    ///
    /// Phase one (transactional): atomically promote the oldest PENDING
    /// entry to PROCESSING — refused while any entry is PROCESSING —
    /// and fire the session's `start` transition; an entry whose
    /// session refuses `start` is marked COMPLETED and the call returns
    /// `Idle`, so a stale entry never blocks the ones behind it. Phase
    /// two (outside the transaction): hand the session to the
    /// dispatcher; on failure
    /// the claim is rolled back in a fresh transaction and the error is
    /// surfaced as `AppError::Dispatch`. The next tick retries
    /// naturally; dispatch is never retried inline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dispatch` after a successful rollback of a
    /// failed handoff, or `AppError::Db` on persistence failure.
    pub async fn schedule_next(&self) -> Result<DispatchOutcome> {
        let mut tx = self.db.begin().await?;

        let Some(entry) = queue_repo::claim_next_in(&mut tx).await? else {
            return Ok(DispatchOutcome::Idle);
        };

        let session = session_repo::fetch_in(&mut tx, &entry.session_id)
            .await?
            .ok_or_else(|| {
                AppError::Db(format!(
                    "queue entry {} references missing session {}",
                    entry.id, entry.session_id
                ))
            })?;

        let next = match lifecycle::transition(session.status, Trigger::Start, &[]) {
            Ok(next) => next,
            Err(err) => {
                // A pending entry whose session can no longer start
                // would be claimed and rolled back on every tick,
                // starving everything behind it. Settle it instead.
                queue_repo::set_status_in(&mut tx, &entry.id, QueueStatus::Completed).await?;
                tx.commit().await?;
                warn!(
                    session_id = entry.session_id,
                    entry_id = entry.id,
                    %err,
                    "queue entry settled: session cannot start"
                );
                return Ok(DispatchOutcome::Idle);
            }
        };
        session_repo::set_status_in(&mut tx, &entry.session_id, next).await?;

        tx.commit().await?;
        info!(
            session_id = entry.session_id,
            entry_id = entry.id,
            "queue entry claimed, handing off"
        );

        match self.dispatcher.submit(&entry.session_id, &entry.execution_config).await {
            Ok(()) => Ok(DispatchOutcome::Dispatched {
                session_id: entry.session_id,
            }),
            Err(err) => {
                warn!(
                    session_id = entry.session_id,
                    %err,
                    "dispatch handoff failed, rolling back claim"
                );
                self.rollback_claim(&entry).await?;
                Err(AppError::Dispatch(format!(
                    "handoff for session {} failed and was rolled back: {err}",
                    entry.session_id
                )))
            }
        }
    }

    /// Undo a claim after a failed handoff: entry back to PENDING,
    /// session back to READY_FOR_ASSESSMENT.
    ///
    /// Runs in its own transaction so it succeeds independently of the
    /// failed handoff.
    async fn rollback_claim(&self, entry: &QueueEntry) -> Result<()> {
        let mut tx = self.db.begin().await?;
        queue_repo::set_status_in(&mut tx, &entry.id, QueueStatus::Pending).await?;
        session_repo::set_status_in(&mut tx, &entry.session_id, SessionStatus::ReadyForAssessment)
            .await?;
        tx.commit().await?;
        info!(
            session_id = entry.session_id,
            entry_id = entry.id,
            "dispatch claim rolled back"
        );
        Ok(())
    }
}

/// Settle queue entries left PROCESSING by a previous process.
///
/// Startup crash recovery: a crash between claim and completion leaves
/// an entry PROCESSING with no worker attached. An entry whose session
/// is still READY or ASSESSING goes back to PENDING (and the session to
/// READY_FOR_ASSESSMENT) for re-dispatch; an entry whose session has
/// already moved past assessment — the agent submitted before the crash
/// — is marked COMPLETED, since re-pending it would leave an
/// undispatchable entry at the head of the queue. Returns the number of
/// entries returned to PENDING.
///
/// # Errors
///
/// Returns `AppError::Db` on persistence failure.
pub async fn recover_startup(db: &Arc<SqlitePool>) -> Result<usize> {
    let mut tx = db.begin().await?;
    let orphaned = queue_repo::list_processing_in(&mut tx).await?;

    let mut requeued = 0usize;
    for entry in &orphaned {
        let status = session_repo::fetch_in(&mut tx, &entry.session_id)
            .await?
            .map(|session| session.status);
        let restartable = matches!(
            status,
            Some(SessionStatus::ReadyForAssessment | SessionStatus::AssessingControls)
        );

        if restartable {
            queue_repo::set_status_in(&mut tx, &entry.id, QueueStatus::Pending).await?;
            sqlx::query(
                "UPDATE session SET status = 'ready_for_assessment', updated_at = ?1
                 WHERE id = ?2 AND status = 'assessing_controls'",
            )
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&entry.session_id)
            .execute(&mut *tx)
            .await?;
            requeued += 1;
        } else {
            queue_repo::set_status_in(&mut tx, &entry.id, QueueStatus::Completed).await?;
            info!(
                session_id = entry.session_id,
                entry_id = entry.id,
                "orphaned entry settled: session already past assessment"
            );
        }
    }
    tx.commit().await?;

    if !orphaned.is_empty() {
        warn!(
            count = orphaned.len(),
            requeued, "recovered queue entries left processing by a previous run"
        );
    }
    Ok(requeued)
}

/// Spawn the periodic scheduler tick.
///
/// Ticks every `interval`, and immediately whenever `reschedule` is
/// notified (session submission, completed execution). Stops when the
/// `CancellationToken` fires.
#[must_use]
pub fn spawn_scheduler_tick(
    scheduler: Scheduler,
    interval: Duration,
    reschedule: Arc<Notify>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("scheduler tick shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                    () = reschedule.notified() => {}
                }

                match scheduler.schedule_next().await {
                    Ok(DispatchOutcome::Dispatched { session_id }) => {
                        info!(session_id, "session dispatched");
                    }
                    Ok(DispatchOutcome::Idle) => {}
                    Err(err) => error!(%err, "scheduler tick failed"),
                }
            }
        }
        .instrument(info_span!("scheduler_tick")),
    )
}
