//! Session factory integration: batch carving, exclusive assignment,
//! and queue wiring.

use std::collections::HashSet;
use std::sync::Arc;

use assessd::assessment::factory::{create_session, CreateSessionRequest};
use assessd::config::GlobalConfig;
use assessd::models::finding::Finding;
use assessd::models::job::{Job, JobStatus};
use assessd::models::queue::{ExecutionConfig, QueueStatus};
use assessd::models::session::SessionStatus;
use assessd::persistence::finding_repo::FindingRepo;
use assessd::persistence::job_repo::JobRepo;
use assessd::persistence::queue_repo::QueueRepo;
use assessd::persistence::{db, SqlitePool};
use assessd::AppError;

fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r#"
db_path = "/tmp/assessd-factory-test.db"

[limits]
batch_size = 5
action_limit = 100

[runner]
agent_cmd = "echo"
log_dir = "/tmp/assessd-factory-logs"
"#,
    )
    .expect("valid test config")
}

async fn seed_job(db: &Arc<SqlitePool>, finding_count: usize) -> Job {
    let job = Job::new("factory-job".into(), "corpus-1".into());
    JobRepo::new(Arc::clone(db)).create(&job).await.expect("create job");
    let repo = FindingRepo::new(Arc::clone(db));
    for i in 0..finding_count {
        let finding = Finding::new(job.id.clone(), format!("CTRL-{i}"));
        repo.create(&finding).await.expect("create finding");
    }
    job
}

fn request(job_id: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        job_id: job_id.into(),
        ..CreateSessionRequest::default()
    }
}

#[tokio::test]
async fn seven_findings_with_batch_five_carve_into_two_sessions() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let config = test_config();
    let job = seed_job(&pool, 7).await;

    let first = create_session(&pool, &config, request(&job.id))
        .await
        .expect("first create")
        .expect("first session");
    let second = create_session(&pool, &config, request(&job.id))
        .await
        .expect("second create")
        .expect("second session");

    // No unassigned findings remain: the third call creates nothing.
    let third = create_session(&pool, &config, request(&job.id)).await.expect("third create");
    assert!(third.is_none());

    let finding_repo = FindingRepo::new(Arc::clone(&pool));
    let first_batch = finding_repo.list_for_session(&first.id).await.expect("first batch");
    let second_batch = finding_repo.list_for_session(&second.id).await.expect("second batch");
    assert_eq!(first_batch.len(), 5);
    assert_eq!(second_batch.len(), 2);

    // Every finding belongs to exactly one session.
    let mut seen: HashSet<String> = HashSet::new();
    for finding in first_batch.iter().chain(second_batch.iter()) {
        assert!(seen.insert(finding.id.clone()), "finding in two sessions");
    }
    assert_eq!(seen.len(), 7);
    assert!(finding_repo.list_unassigned_for_job(&job.id).await.expect("unassigned").is_empty());
}

#[tokio::test]
async fn created_session_is_ready_and_enqueued_pending() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let config = test_config();
    let job = seed_job(&pool, 3).await;

    let exec_config = ExecutionConfig {
        model: Some("opus".into()),
        ..ExecutionConfig::default()
    };
    let session = create_session(
        &pool,
        &config,
        CreateSessionRequest {
            job_id: job.id.clone(),
            priority: 2,
            execution_config: exec_config.clone(),
            ..CreateSessionRequest::default()
        },
    )
    .await
    .expect("create")
    .expect("session");

    assert_eq!(session.status, SessionStatus::ReadyForAssessment);
    assert_eq!(session.action_limit, config.limits.action_limit);

    let entry = QueueRepo::new(Arc::clone(&pool))
        .get_by_session(&session.id)
        .await
        .expect("queue lookup")
        .expect("entry exists");
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.priority, 2);
    assert_eq!(entry.job_id, job.id);
    assert_eq!(entry.execution_config, exec_config);
}

#[tokio::test]
async fn first_session_flips_job_to_assessing() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let config = test_config();
    let job = seed_job(&pool, 2).await;
    assert_eq!(job.status, JobStatus::Pending);

    create_session(&pool, &config, request(&job.id))
        .await
        .expect("create")
        .expect("session");

    let fetched = JobRepo::new(pool).get_by_id(&job.id).await.expect("fetch job");
    assert_eq!(fetched.status, JobStatus::Assessing);
}

#[tokio::test]
async fn per_request_limit_overrides_take_effect() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let config = test_config();
    let job = seed_job(&pool, 4).await;

    let session = create_session(
        &pool,
        &config,
        CreateSessionRequest {
            job_id: job.id.clone(),
            batch_size: Some(2),
            action_limit: Some(7),
            timeout_seconds: Some(120),
            ..CreateSessionRequest::default()
        },
    )
    .await
    .expect("create")
    .expect("session");

    assert_eq!(session.action_limit, 7);
    assert_eq!(session.timeout_seconds, 120);

    let assigned = FindingRepo::new(pool).list_for_session(&session.id).await.expect("batch");
    assert_eq!(assigned.len(), 2);
}

#[tokio::test]
async fn unknown_job_is_rejected() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let config = test_config();
    let err = create_session(&pool, &config, request("no-such-job"))
        .await
        .expect_err("unknown job");
    assert!(matches!(err, AppError::NotFound(_)));
}
