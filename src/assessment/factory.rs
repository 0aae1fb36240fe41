//! Session factory: carves a batch of unassigned findings into a new
//! session and enqueues its dispatch record.

use std::sync::Arc;

use tracing::info;

use crate::config::GlobalConfig;
use crate::models::queue::{ExecutionConfig, QueueEntry};
use crate::models::session::{Session, SessionLimits};
use crate::persistence::{finding_repo, job_repo, queue_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

/// Parameters for one `create_session` call.
///
/// Limit fields default from [`GlobalConfig`] when unset.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Job to carve findings from.
    pub job_id: String,
    /// Findings to assign; defaults to `limits.batch_size`.
    pub batch_size: Option<i64>,
    /// Per-request action limit override.
    pub action_limit: Option<i64>,
    /// Per-request timeout override.
    pub timeout_seconds: Option<i64>,
    /// Queue priority tie-break.
    pub priority: i64,
    /// Opaque execution configuration for the runner.
    pub execution_config: ExecutionConfig,
}

/// Create a session over the job's unassigned findings.
///
/// Selects up to `batch_size` findings with `session_id IS NULL`,
/// assigns them, and enqueues a PENDING queue entry — all in one
/// transaction, so no finding can land in two sessions. Flips the
/// owning job from pending to assessing on the first session.
///
/// Returns `Ok(None)` when the job has no unassigned findings left;
/// callers must treat that as "no session created", not an error.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the job does not exist, or
/// `AppError::Db` on persistence failure.
pub async fn create_session(
    db: &Arc<SqlitePool>,
    config: &GlobalConfig,
    request: CreateSessionRequest,
) -> Result<Option<Session>> {
    let batch_size = request.batch_size.unwrap_or(config.limits.batch_size);
    let limits = SessionLimits {
        action_limit: request.action_limit.unwrap_or(config.limits.action_limit),
        error_limit: config.limits.error_limit,
        warning_limit: config.limits.warning_limit,
        timeout_seconds: request
            .timeout_seconds
            .unwrap_or(config.limits.timeout_seconds),
    };

    let mut tx = db.begin().await?;

    job_repo::fetch_in(&mut tx, &request.job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {} not found", request.job_id)))?;

    let batch = finding_repo::list_unassigned_in(&mut tx, &request.job_id, batch_size).await?;
    if batch.is_empty() {
        return Ok(None);
    }

    let session = Session::new(request.job_id.clone(), limits);
    session_repo::create_in(&mut tx, &session).await?;

    for finding in &batch {
        let claimed = finding_repo::assign_session_in(&mut tx, &finding.id, &session.id).await?;
        if !claimed {
            // The select above runs in this same transaction, so a lost
            // claim means the invariant is already broken elsewhere.
            return Err(AppError::Db(format!(
                "finding {} was assigned concurrently",
                finding.id
            )));
        }
    }

    let entry = QueueEntry::new(
        session.id.clone(),
        request.job_id.clone(),
        request.priority,
        request.execution_config,
    );
    queue_repo::create_in(&mut tx, &entry).await?;

    job_repo::mark_assessing_in(&mut tx, &request.job_id).await?;

    tx.commit().await?;

    info!(
        session_id = session.id,
        job_id = request.job_id,
        findings = batch.len(),
        "session created and enqueued"
    );
    Ok(Some(session))
}
