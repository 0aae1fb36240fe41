//! External agent process runner and completion monitor.
//!
//! Launches the configured agent binary for a session with a rendered
//! task prompt, a session-scoped log file, and a bounded execution
//! timeout. A timeout synthesizes a distinguished failure result
//! instead of propagating as a fault. `monitor_completion` settles the
//! session and queue entry afterwards in one transaction.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::finding::Finding;
use crate::models::job::Job;
use crate::models::queue::ExecutionConfig;
use crate::models::session::{Session, SessionStatus};
use crate::persistence::{finding_repo, job_repo, queue_repo, session_repo, SqlitePool};
use crate::{AppError, Result};

/// Outcome of one agent process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code; `None` when the process was killed or never launched.
    pub return_code: Option<i32>,
    /// Whether the hard execution timeout fired.
    pub timed_out: bool,
    /// Session-scoped log file the process wrote to.
    pub log_path: PathBuf,
}

impl ProcessResult {
    /// Whether the process finished cleanly within its budget.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.return_code == Some(0)
    }

    /// Synthesized result for a process that could not be launched.
    #[must_use]
    pub fn launch_failure(log_path: PathBuf) -> Self {
        Self {
            return_code: None,
            timed_out: false,
            log_path,
        }
    }
}

/// Everything resolved up front for one execution.
#[derive(Debug, Clone)]
pub struct PreparedExecution {
    /// Session being executed.
    pub session: Session,
    /// Owning job, resolved for its corpus.
    pub job: Job,
    /// Findings assigned to the session, in creation order.
    pub findings: Vec<Finding>,
    /// Opaque execution configuration from the queue entry.
    pub execution_config: ExecutionConfig,
    /// Session-scoped log file.
    pub log_path: PathBuf,
}

/// Resolve session, job, findings, and the log sink for an execution.
///
/// Also records the log path on the session so operators can find the
/// output while the agent is still running.
///
/// # Errors
///
/// Returns `AppError::Dispatch` when any precondition cannot be
/// resolved — the scheduler rolls the claim back in that case.
pub async fn prepare_execution(
    db: &Arc<SqlitePool>,
    config: &GlobalConfig,
    session_id: &str,
    execution_config: &ExecutionConfig,
) -> Result<PreparedExecution> {
    let mut conn = db
        .acquire()
        .await
        .map_err(|err| AppError::Dispatch(format!("db unavailable: {err}")))?;

    let session = session_repo::fetch_in(&mut conn, session_id)
        .await?
        .ok_or_else(|| AppError::Dispatch(format!("session {session_id} not found")))?;
    let job = job_repo::fetch_in(&mut conn, &session.job_id)
        .await?
        .ok_or_else(|| AppError::Dispatch(format!("job {} not found", session.job_id)))?;
    drop(conn);

    let findings = finding_repo::FindingRepo::new(Arc::clone(db))
        .list_for_session(session_id)
        .await?;

    std::fs::create_dir_all(&config.runner.log_dir)
        .map_err(|err| AppError::Dispatch(format!("cannot create log dir: {err}")))?;
    let log_path = config
        .runner
        .log_dir
        .join(format!("session-{session_id}.log"));

    session_repo::SessionRepo::new(Arc::clone(db))
        .set_log_path(session_id, &log_path.to_string_lossy())
        .await?;

    Ok(PreparedExecution {
        session,
        job,
        findings,
        execution_config: execution_config.clone(),
        log_path,
    })
}

/// Render the task prompt for the agent.
///
/// The execution config's `prompt_override` wins outright; otherwise a
/// role/task prompt is built from the job's corpus and the assigned
/// control items.
#[must_use]
pub fn render_prompt(prepared: &PreparedExecution) -> String {
    if let Some(ref prompt) = prepared.execution_config.prompt_override {
        return prompt.clone();
    }

    let controls: Vec<String> = prepared
        .findings
        .iter()
        .map(|f| format!("- {} (finding {})", f.control_item_id, f.id))
        .collect();

    format!(
        "You are a compliance assessor working on job '{}' against corpus '{}'.\n\
         Assess each control item below. For every finding: search and read the corpus, \
         cite evidence line ranges, and record a judgement. Submit the session when all \
         findings are judged.\n\nControl items:\n{}",
        prepared.job.name,
        prepared.job.corpus_id,
        controls.join("\n")
    )
}

/// Launch the agent process and wait for it with a bounded timeout.
///
/// All process output goes to the session-scoped log file. The
/// effective timeout is the configured execution timeout clamped by the
/// actor-level cap; both are enforced here, independently of the
/// session's business-level `timeout_seconds` (which the stall sweep
/// enforces).
///
/// # Errors
///
/// Returns `AppError::AgentProcess` if the process cannot be spawned or
/// waited on, or `AppError::Io` if the log sink cannot be opened.
pub async fn execute(config: &GlobalConfig, prepared: &PreparedExecution) -> Result<ProcessResult> {
    let session_id = &prepared.session.id;
    let prompt = render_prompt(prepared);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&prepared.log_path)
        .map_err(|err| AppError::Io(format!("cannot open agent log: {err}")))?;
    let stderr_file = log_file
        .try_clone()
        .map_err(|err| AppError::Io(format!("cannot clone agent log handle: {err}")))?;

    let api_key = prepared
        .execution_config
        .api_key
        .clone()
        .unwrap_or_else(|| config.model.api_key.clone());
    let model = prepared
        .execution_config
        .model
        .clone()
        .or_else(|| config.model.model.clone())
        .unwrap_or_default();

    let mut cmd = Command::new(&config.runner.agent_cmd);
    cmd.args(&config.runner.agent_args)
        .arg(&prompt)
        .env("ASSESSD_SESSION_ID", session_id)
        .env("ASSESSD_MODE", "assessment")
        .env("ASSESSD_CORPUS_ID", &prepared.job.corpus_id)
        .env("ASSESSD_MODEL", &model)
        .env("ASSESSD_MODEL_API_KEY", &api_key)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr_file))
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::AgentProcess(format!("failed to spawn agent: {err}")))?;

    info!(
        session_id,
        pid = child.id().unwrap_or(0),
        agent_cmd = config.runner.agent_cmd,
        "agent process spawned"
    );

    let timeout_secs = config
        .runner
        .execution_timeout_seconds
        .min(config.runner.actor_cap_seconds);
    let wait_result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

    match wait_result {
        Ok(Ok(status)) => {
            let return_code = status.code();
            info!(session_id, ?return_code, "agent process exited");
            Ok(ProcessResult {
                return_code,
                timed_out: false,
                log_path: prepared.log_path.clone(),
            })
        }
        Ok(Err(err)) => Err(AppError::AgentProcess(format!(
            "failed waiting for agent: {err}"
        ))),
        Err(_) => {
            warn!(session_id, timeout_secs, "agent execution timed out, killing process");
            if let Err(err) = child.kill().await {
                warn!(session_id, %err, "failed to kill timed-out agent");
            }
            Ok(ProcessResult {
                return_code: None,
                timed_out: true,
                log_path: prepared.log_path.clone(),
            })
        }
    }
}

/// Settle session and queue state after a process execution ends.
///
/// If the agent never drove its own lifecycle (session still
/// ASSESSING): a clean exit force-promotes to SUBMITTED_FOR_REVIEW and
/// bumps `warning_count` — a deliberate leniency, flagged by the
/// warning, not a correctness guarantee; anything else force-fails and
/// bumps `error_count`. A session that already left ASSESSING is left
/// untouched. The queue entry is completed whenever it is still
/// PROCESSING, regardless of session outcome, so the scheduler is
/// always unblocked.
///
/// Runs in one transaction; on error everything rolls back and the
/// queue entry is left as-is for the next sweep to reconsider.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session vanished, or
/// `AppError::Db` on persistence failure.
pub async fn monitor_completion(
    db: &Arc<SqlitePool>,
    session_id: &str,
    result: &ProcessResult,
) -> Result<()> {
    let mut tx = db.begin().await?;

    let session = session_repo::fetch_in(&mut tx, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

    if session.status == SessionStatus::AssessingControls {
        if result.success() {
            session_repo::set_status_in(&mut tx, session_id, SessionStatus::SubmittedForReview)
                .await?;
            session_repo::bump_warning_in(&mut tx, session_id).await?;
            warn!(
                session_id,
                "agent exited cleanly without submitting; promoted to review"
            );
        } else {
            session_repo::set_status_in(&mut tx, session_id, SessionStatus::Failed).await?;
            session_repo::bump_error_in(&mut tx, session_id).await?;
            warn!(
                session_id,
                return_code = ?result.return_code,
                timed_out = result.timed_out,
                "agent failed without submitting; session failed"
            );
        }
    }

    if let Some(entry) = queue_repo::fetch_by_session_in(&mut tx, session_id).await? {
        let completed = queue_repo::complete_if_processing_in(&mut tx, &entry.id).await?;
        if completed {
            info!(session_id, entry_id = entry.id, "queue entry completed");
        }
    }

    tx.commit().await?;
    Ok(())
}
