//! Completion monitor integration: settling sessions and queue entries
//! after the agent process exits.

use std::path::PathBuf;
use std::sync::Arc;

use assessd::models::finding::Finding;
use assessd::models::job::Job;
use assessd::models::queue::{ExecutionConfig, QueueEntry, QueueStatus};
use assessd::models::session::{Session, SessionLimits, SessionStatus};
use assessd::orchestrator::runner::{monitor_completion, ProcessResult};
use assessd::persistence::finding_repo::FindingRepo;
use assessd::persistence::job_repo::JobRepo;
use assessd::persistence::queue_repo::{self, QueueRepo};
use assessd::persistence::session_repo::{self, SessionRepo};
use assessd::persistence::{db, SqlitePool};
use assessd::AppError;

fn limits() -> SessionLimits {
    SessionLimits {
        action_limit: 100,
        error_limit: 10,
        warning_limit: 10,
        timeout_seconds: 3600,
    }
}

/// Seed an ASSESSING session with a PROCESSING queue entry, the state a
/// session is in while its agent runs.
async fn seed_running_session(db: &Arc<SqlitePool>) -> (Session, QueueEntry) {
    let job = Job::new("monitor-job".into(), "corpus-1".into());
    JobRepo::new(Arc::clone(db)).create(&job).await.expect("create job");

    let session = Session::new(job.id.clone(), limits());
    SessionRepo::new(Arc::clone(db)).create(&session).await.expect("create session");
    let finding = Finding::new(job.id.clone(), "CTRL-1".into());
    FindingRepo::new(Arc::clone(db)).create(&finding).await.expect("create finding");

    let entry = QueueEntry::new(session.id.clone(), job.id, 0, ExecutionConfig::default());
    QueueRepo::new(Arc::clone(db)).create(&entry).await.expect("enqueue");

    let mut conn = db.acquire().await.expect("acquire");
    session_repo::set_status_in(&mut conn, &session.id, SessionStatus::AssessingControls)
        .await
        .expect("to assessing");
    queue_repo::set_status_in(&mut conn, &entry.id, QueueStatus::Processing)
        .await
        .expect("to processing");
    (session, entry)
}

fn result(return_code: Option<i32>, timed_out: bool) -> ProcessResult {
    ProcessResult {
        return_code,
        timed_out,
        log_path: PathBuf::from("/tmp/assessd-monitor-test.log"),
    }
}

#[tokio::test]
async fn clean_exit_without_submit_promotes_with_a_warning() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, entry) = seed_running_session(&pool).await;

    monitor_completion(&pool, &session.id, &result(Some(0), false))
        .await
        .expect("monitor");

    let settled = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(settled.status, SessionStatus::SubmittedForReview);
    assert_eq!(settled.warning_count, 1);
    assert_eq!(settled.error_count, 0);

    let entry = QueueRepo::new(pool).get_by_id(&entry.id).await.expect("entry");
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn nonzero_exit_fails_the_session() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, entry) = seed_running_session(&pool).await;

    monitor_completion(&pool, &session.id, &result(Some(3), false))
        .await
        .expect("monitor");

    let settled = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(settled.status, SessionStatus::Failed);
    assert_eq!(settled.error_count, 1);
    assert_eq!(settled.warning_count, 0);

    let entry = QueueRepo::new(pool).get_by_id(&entry.id).await.expect("entry");
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn timeout_counts_as_failure_even_with_no_exit_code() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, entry) = seed_running_session(&pool).await;

    monitor_completion(&pool, &session.id, &result(None, true))
        .await
        .expect("monitor");

    let settled = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(settled.status, SessionStatus::Failed);
    assert_eq!(settled.error_count, 1);

    let entry = QueueRepo::new(pool).get_by_id(&entry.id).await.expect("entry");
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn session_that_already_submitted_is_left_alone() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, entry) = seed_running_session(&pool).await;

    // The agent drove its own submit before exiting.
    let mut conn = pool.acquire().await.expect("acquire");
    session_repo::set_status_in(&mut conn, &session.id, SessionStatus::SubmittedForReview)
        .await
        .expect("agent submitted");
    drop(conn);

    monitor_completion(&pool, &session.id, &result(Some(0), false))
        .await
        .expect("monitor");

    let settled = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(settled.status, SessionStatus::SubmittedForReview);
    assert_eq!(settled.warning_count, 0, "no forced-promotion warning");

    // The queue entry still completes so the scheduler is unblocked.
    let entry = QueueRepo::new(pool).get_by_id(&entry.id).await.expect("entry");
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn missing_session_surfaces_not_found() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let err = monitor_completion(&pool, "no-such-session", &result(Some(0), false))
        .await
        .expect_err("missing session");
    assert!(matches!(err, AppError::NotFound(_)));
}
