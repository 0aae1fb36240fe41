//! Work dispatch abstraction between the scheduler and the runner.
//!
//! The scheduler hands a claimed session off through [`WorkDispatcher`]
//! and treats a returned `Ok` as an acknowledgment of receipt; from
//! that point dispatch is fire-and-forget. The concrete transport is
//! swappable — the production implementation spawns a worker task that
//! runs the agent process and reports completion back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info};

use crate::config::GlobalConfig;
use crate::models::queue::ExecutionConfig;
use crate::persistence::SqlitePool;
use crate::Result;

use super::runner;

/// Handoff interface the scheduler dispatches through.
pub trait WorkDispatcher: Send + Sync {
    /// Accept a claimed session for execution.
    ///
    /// Returning `Ok` acknowledges receipt; the actual agent execution
    /// proceeds asynchronously. A returned error triggers the
    /// scheduler's rollback path (entry back to PENDING, session back
    /// to READY_FOR_ASSESSMENT).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Dispatch`](crate::AppError::Dispatch) when
    /// the worker cannot be invoked.
    fn submit<'a>(
        &'a self,
        session_id: &'a str,
        execution_config: &'a ExecutionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Production dispatcher: runs the agent process in a spawned worker
/// task and retriggers the scheduler once completion is handled.
pub struct RunnerDispatcher {
    db: Arc<SqlitePool>,
    config: Arc<GlobalConfig>,
    reschedule: Arc<Notify>,
}

impl RunnerDispatcher {
    /// Create a dispatcher; `reschedule` is notified after every
    /// completed execution so the scheduler tick can run immediately.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>, config: Arc<GlobalConfig>, reschedule: Arc<Notify>) -> Self {
        Self {
            db,
            config,
            reschedule,
        }
    }
}

impl WorkDispatcher for RunnerDispatcher {
    fn submit<'a>(
        &'a self,
        session_id: &'a str,
        execution_config: &'a ExecutionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            // Validate the launch preconditions before acknowledging, so
            // an unresolvable session rolls back through the scheduler
            // instead of failing silently in the worker.
            let prepared =
                runner::prepare_execution(&self.db, &self.config, session_id, execution_config)
                    .await?;

            let db = Arc::clone(&self.db);
            let config = Arc::clone(&self.config);
            let reschedule = Arc::clone(&self.reschedule);
            let session_id = session_id.to_owned();

            tokio::spawn(async move {
                let result = runner::execute(&config, &prepared).await;
                let result = match result {
                    Ok(result) => result,
                    Err(err) => {
                        error!(session_id, %err, "agent execution errored before completion");
                        runner::ProcessResult::launch_failure(prepared.log_path.clone())
                    }
                };

                match runner::monitor_completion(&db, &session_id, &result).await {
                    Ok(()) => info!(session_id, "completion handled"),
                    Err(err) => {
                        // Queue entry is left as-is for the stall sweep
                        // to reconsider; never silently completed.
                        error!(session_id, %err, "completion handling failed");
                    }
                }

                reschedule.notify_one();
            });

            Ok(())
        })
    }
}
