//! Scheduler integration: single-flight claims, two-phase handoff, and
//! rollback of failed dispatches.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use assessd::models::finding::Finding;
use assessd::models::job::Job;
use assessd::models::queue::{ExecutionConfig, QueueEntry, QueueStatus};
use assessd::models::session::{Session, SessionLimits, SessionStatus};
use assessd::orchestrator::dispatch::WorkDispatcher;
use assessd::orchestrator::scheduler::{recover_startup, DispatchOutcome, Scheduler};
use assessd::persistence::finding_repo::FindingRepo;
use assessd::persistence::job_repo::JobRepo;
use assessd::persistence::queue_repo::{self, QueueRepo};
use assessd::persistence::session_repo::SessionRepo;
use assessd::persistence::{db, SqlitePool};
use assessd::{AppError, Result};
use chrono::{Duration, Utc};

/// Dispatcher stub that records submissions and fails on demand.
struct StubDispatcher {
    submitted: Mutex<Vec<String>>,
    fail: bool,
}

impl StubDispatcher {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn submitted(&self) -> Vec<String> {
        self.submitted.lock().expect("lock").clone()
    }
}

impl WorkDispatcher for StubDispatcher {
    fn submit<'a>(
        &'a self,
        session_id: &'a str,
        _execution_config: &'a ExecutionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail {
                return Err(AppError::Dispatch("stub refuses work".into()));
            }
            self.submitted.lock().expect("lock").push(session_id.to_owned());
            Ok(())
        })
    }
}

fn limits() -> SessionLimits {
    SessionLimits {
        action_limit: 100,
        error_limit: 10,
        warning_limit: 10,
        timeout_seconds: 3600,
    }
}

/// Seed one READY session with a PENDING entry created `age_secs` ago.
async fn seed_ready_session(db: &Arc<SqlitePool>, job: &Job, age_secs: i64) -> Session {
    let session = Session::new(job.id.clone(), limits());
    SessionRepo::new(Arc::clone(db)).create(&session).await.expect("create session");

    let finding = Finding::new(job.id.clone(), format!("CTRL-{}", session.id));
    FindingRepo::new(Arc::clone(db)).create(&finding).await.expect("create finding");

    let mut entry = QueueEntry::new(
        session.id.clone(),
        job.id.clone(),
        0,
        ExecutionConfig::default(),
    );
    entry.created_at = Utc::now() - Duration::seconds(age_secs);
    entry.updated_at = entry.created_at;
    QueueRepo::new(Arc::clone(db)).create(&entry).await.expect("enqueue");
    session
}

async fn seed_job(db: &Arc<SqlitePool>) -> Job {
    let job = Job::new("scheduler-job".into(), "corpus-1".into());
    JobRepo::new(Arc::clone(db)).create(&job).await.expect("create job");
    job
}

#[tokio::test]
async fn empty_queue_is_idle() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let scheduler = Scheduler::new(Arc::clone(&pool), StubDispatcher::accepting());
    assert_eq!(scheduler.schedule_next().await.expect("schedule"), DispatchOutcome::Idle);
}

#[tokio::test]
async fn dispatch_claims_oldest_and_starts_the_session() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let older = seed_ready_session(&pool, &job, 60).await;
    let _newer = seed_ready_session(&pool, &job, 10).await;

    let dispatcher = StubDispatcher::accepting();
    let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);

    let outcome = scheduler.schedule_next().await.expect("schedule");
    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            session_id: older.id.clone()
        }
    );
    assert_eq!(dispatcher.submitted(), vec![older.id.clone()]);

    let session = SessionRepo::new(Arc::clone(&pool)).get_by_id(&older.id).await.expect("fetch");
    assert_eq!(session.status, SessionStatus::AssessingControls);

    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&older.id)
        .await
        .expect("entry lookup")
        .expect("entry");
    assert_eq!(entry.status, QueueStatus::Processing);

    // Single flight: nothing else dispatches until this one completes.
    assert_eq!(scheduler.schedule_next().await.expect("second"), DispatchOutcome::Idle);
}

#[tokio::test]
async fn completion_reopens_the_queue_for_the_next_entry() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let first = seed_ready_session(&pool, &job, 60).await;
    let second = seed_ready_session(&pool, &job, 10).await;

    let dispatcher = StubDispatcher::accepting();
    let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);

    scheduler.schedule_next().await.expect("first dispatch");

    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&first.id)
        .await
        .expect("entry lookup")
        .expect("entry");
    let mut conn = pool.acquire().await.expect("acquire");
    queue_repo::complete_if_processing_in(&mut conn, &entry.id).await.expect("complete");
    drop(conn);

    let outcome = scheduler.schedule_next().await.expect("second dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            session_id: second.id.clone()
        }
    );
    assert_eq!(dispatcher.submitted(), vec![first.id, second.id]);
}

#[tokio::test]
async fn failed_handoff_rolls_the_claim_back() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let session = seed_ready_session(&pool, &job, 10).await;

    let scheduler = Scheduler::new(Arc::clone(&pool), StubDispatcher::failing());
    let err = scheduler.schedule_next().await.expect_err("handoff fails");
    assert!(matches!(err, AppError::Dispatch(_)));

    // Entry back to PENDING, session back to READY.
    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&session.id)
        .await
        .expect("entry lookup")
        .expect("entry");
    assert_eq!(entry.status, QueueStatus::Pending);
    let restored = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(restored.status, SessionStatus::ReadyForAssessment);

    // A healthy dispatcher picks the same entry up again.
    let dispatcher = StubDispatcher::accepting();
    let retry = Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);
    let outcome = retry.schedule_next().await.expect("retry dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            session_id: session.id.clone()
        }
    );
}

#[tokio::test]
async fn startup_recovery_resets_orphaned_processing_entries() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let session = seed_ready_session(&pool, &job, 10).await;

    // Simulate a crash mid-dispatch: entry PROCESSING, session ASSESSING.
    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&session.id)
        .await
        .expect("lookup")
        .expect("entry");
    let mut conn = pool.acquire().await.expect("acquire");
    queue_repo::set_status_in(&mut conn, &entry.id, QueueStatus::Processing)
        .await
        .expect("to processing");
    assessd::persistence::session_repo::set_status_in(
        &mut conn,
        &session.id,
        SessionStatus::AssessingControls,
    )
    .await
    .expect("to assessing");
    drop(conn);

    let recovered = recover_startup(&pool).await.expect("recover");
    assert_eq!(recovered, 1);

    let entry = QueueRepo::new(Arc::clone(&pool)).get_by_id(&entry.id).await.expect("entry");
    assert_eq!(entry.status, QueueStatus::Pending);
    let restored = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(restored.status, SessionStatus::ReadyForAssessment);

    // Idempotent when nothing is stuck.
    assert_eq!(recover_startup(&pool).await.expect("second recover"), 0);
}

#[tokio::test]
async fn startup_recovery_settles_entries_for_sessions_past_assessment() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let submitted = seed_ready_session(&pool, &job, 60).await;
    let healthy = seed_ready_session(&pool, &job, 10).await;

    // Crash after the agent submitted but before completion handling:
    // entry PROCESSING, session already SUBMITTED_FOR_REVIEW.
    let crashed_entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&submitted.id)
        .await
        .expect("lookup")
        .expect("entry");
    let mut conn = pool.acquire().await.expect("acquire");
    queue_repo::set_status_in(&mut conn, &crashed_entry.id, QueueStatus::Processing)
        .await
        .expect("to processing");
    assessd::persistence::session_repo::set_status_in(
        &mut conn,
        &submitted.id,
        SessionStatus::SubmittedForReview,
    )
    .await
    .expect("to submitted");
    drop(conn);

    // Nothing restartable, so nothing goes back to PENDING.
    assert_eq!(recover_startup(&pool).await.expect("recover"), 0);

    let settled = QueueRepo::new(Arc::clone(&pool))
        .get_by_id(&crashed_entry.id)
        .await
        .expect("entry");
    assert_eq!(settled.status, QueueStatus::Completed);
    let session = SessionRepo::new(Arc::clone(&pool)).get_by_id(&submitted.id).await.expect("fetch");
    assert_eq!(session.status, SessionStatus::SubmittedForReview);

    // The settled entry no longer heads the queue: the younger healthy
    // session dispatches on the very first tick.
    let dispatcher = StubDispatcher::accepting();
    let scheduler =
        Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);
    assert_eq!(
        scheduler.schedule_next().await.expect("dispatch"),
        DispatchOutcome::Dispatched {
            session_id: healthy.id.clone()
        }
    );
}

#[tokio::test]
async fn pending_entry_for_a_session_that_cannot_start_is_settled() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    let blocked = seed_ready_session(&pool, &job, 60).await;
    let healthy = seed_ready_session(&pool, &job, 10).await;

    // The oldest entry stays PENDING while its session has already
    // moved past assessment.
    let mut conn = pool.acquire().await.expect("acquire");
    assessd::persistence::session_repo::set_status_in(
        &mut conn,
        &blocked.id,
        SessionStatus::SubmittedForReview,
    )
    .await
    .expect("to submitted");
    drop(conn);

    let dispatcher = StubDispatcher::accepting();
    let scheduler =
        Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);

    // First tick settles the undispatchable entry instead of erroring.
    assert_eq!(scheduler.schedule_next().await.expect("first tick"), DispatchOutcome::Idle);
    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&blocked.id)
        .await
        .expect("lookup")
        .expect("entry");
    assert_eq!(entry.status, QueueStatus::Completed);
    let session = SessionRepo::new(Arc::clone(&pool)).get_by_id(&blocked.id).await.expect("fetch");
    assert_eq!(session.status, SessionStatus::SubmittedForReview);

    // Second tick reaches the session behind it.
    assert_eq!(
        scheduler.schedule_next().await.expect("second tick"),
        DispatchOutcome::Dispatched {
            session_id: healthy.id.clone()
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ticks_dispatch_exactly_one_session() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let job = seed_job(&pool).await;
    for age in [50, 40, 30, 20] {
        seed_ready_session(&pool, &job, age).await;
    }

    let dispatcher = StubDispatcher::accepting();
    let scheduler =
        Scheduler::new(Arc::clone(&pool), Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move { scheduler.schedule_next().await }));
    }

    let mut dispatched = 0;
    for handle in handles {
        match handle.await.expect("join").expect("schedule") {
            DispatchOutcome::Dispatched { .. } => dispatched += 1,
            DispatchOutcome::Idle => {}
        }
        // Never more than one claim, no matter how the ticks interleave.
        let processing = QueueRepo::new(Arc::clone(&pool)).count_processing().await.expect("count");
        assert!(processing <= 1, "multiple entries claimed concurrently");
    }

    assert_eq!(dispatched, 1);
    assert_eq!(dispatcher.submitted().len(), 1);
    assert_eq!(QueueRepo::new(pool).count_processing().await.expect("count"), 1);
}
