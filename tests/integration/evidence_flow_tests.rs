//! Gated action integration: corpus queries, evidence insertion with
//! merging, and finding updates, all through the Action Gate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use assessd::assessment::action_gate::ActionGate;
use assessd::assessment::actions;
use assessd::backend::{CorpusBackend, DocumentSlice, GrepMatch, SearchHit};
use assessd::models::finding::{Finding, Judgement};
use assessd::models::job::Job;
use assessd::models::session::{Session, SessionLimits, SessionStatus};
use assessd::persistence::action_log_repo::ActionLogRepo;
use assessd::persistence::finding_repo::{self, FindingRepo};
use assessd::persistence::job_repo::JobRepo;
use assessd::persistence::session_repo::SessionRepo;
use assessd::persistence::{db, SqlitePool};
use assessd::{AppError, Result};

/// Backend stub serving canned corpus content.
struct StubBackend;

impl CorpusBackend for StubBackend {
    fn search(
        &self,
        _corpus_id: &str,
        query: &str,
        _limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SearchHit>>> + Send + '_>> {
        let query = query.to_owned();
        Box::pin(async move {
            Ok(vec![SearchHit {
                document_ref: "policies/security.md".into(),
                line: 42,
                snippet: format!("… {query} …"),
            }])
        })
    }

    fn read(
        &self,
        _corpus_id: &str,
        document_ref: &str,
        start_line: i64,
        end_line: i64,
    ) -> Pin<Box<dyn Future<Output = Result<DocumentSlice>> + Send + '_>> {
        let document_ref = document_ref.to_owned();
        Box::pin(async move {
            let count = usize::try_from(end_line - start_line + 1).unwrap_or(0);
            Ok(DocumentSlice {
                document_ref,
                start_line,
                lines: vec!["line".into(); count],
            })
        })
    }

    fn grep(
        &self,
        _corpus_id: &str,
        _pattern: &str,
        _limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GrepMatch>>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Backend stub whose calls always fail upstream.
struct BrokenBackend;

impl CorpusBackend for BrokenBackend {
    fn search(
        &self,
        _corpus_id: &str,
        _query: &str,
        _limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SearchHit>>> + Send + '_>> {
        Box::pin(async { Err(AppError::Backend("upstream unreachable".into())) })
    }

    fn read(
        &self,
        _corpus_id: &str,
        _document_ref: &str,
        _start_line: i64,
        _end_line: i64,
    ) -> Pin<Box<dyn Future<Output = Result<DocumentSlice>> + Send + '_>> {
        Box::pin(async { Err(AppError::Backend("upstream unreachable".into())) })
    }

    fn grep(
        &self,
        _corpus_id: &str,
        _pattern: &str,
        _limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GrepMatch>>> + Send + '_>> {
        Box::pin(async { Err(AppError::Backend("upstream unreachable".into())) })
    }
}

async fn seed(db: &Arc<SqlitePool>) -> (Session, Finding) {
    let job = Job::new("actions-job".into(), "corpus-1".into());
    JobRepo::new(Arc::clone(db)).create(&job).await.expect("create job");

    let session = Session::new(
        job.id.clone(),
        SessionLimits {
            action_limit: 100,
            error_limit: 10,
            warning_limit: 10,
            timeout_seconds: 3600,
        },
    );
    SessionRepo::new(Arc::clone(db)).create(&session).await.expect("create session");

    let finding = Finding::new(job.id, "CTRL-1".into());
    FindingRepo::new(Arc::clone(db)).create(&finding).await.expect("create finding");
    let mut conn = db.acquire().await.expect("acquire");
    finding_repo::assign_session_in(&mut conn, &finding.id, &session.id)
        .await
        .expect("assign");
    (session, finding)
}

#[tokio::test]
async fn search_authorizes_executes_and_audits() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, _) = seed(&pool).await;
    let gate = ActionGate::new(Arc::clone(&pool));

    let hits = actions::search(&pool, &gate, &StubBackend, &session.id, "data retention", 10)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_ref, "policies/security.md");

    // The first action auto-started the session and consumed budget.
    let persisted = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(persisted.status, SessionStatus::AssessingControls);
    assert_eq!(persisted.action_count, 1);

    let entries = ActionLogRepo::new(pool).list_for_session(&session.id).await.expect("log");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result_summary, "1 hit(s)");
    assert_eq!(entries[0].parameters["query"], "data retention");
}

#[tokio::test]
async fn backend_failure_consumes_no_budget_and_logs_nothing() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, _) = seed(&pool).await;
    let gate = ActionGate::new(Arc::clone(&pool));

    let err = actions::search(&pool, &gate, &BrokenBackend, &session.id, "anything", 5)
        .await
        .expect_err("backend down");
    assert!(matches!(err, AppError::Backend(_)));

    let persisted = SessionRepo::new(Arc::clone(&pool)).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(persisted.action_count, 0, "failed calls are free");
    assert_eq!(
        ActionLogRepo::new(pool).count_for_session(&session.id).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn added_evidence_merges_with_nearby_spans() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, finding) = seed(&pool).await;
    let gate = ActionGate::new(Arc::clone(&pool));

    actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 10, 20)
        .await
        .expect("first evidence");
    let merged = actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 23, 30)
        .await
        .expect("second evidence");

    // Gap of 3 lines: coalesced into one span.
    assert_eq!(merged.len(), 1);
    assert_eq!((merged[0].start_line, merged[0].end_line), (10, 30));

    // Distant span stays separate.
    let merged = actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 40, 50)
        .await
        .expect("third evidence");
    let spans: Vec<(i64, i64)> = merged.iter().map(|e| (e.start_line, e.end_line)).collect();
    assert_eq!(spans, vec![(10, 30), (40, 50)]);

    let persisted = SessionRepo::new(pool).get_by_id(&session.id).await.expect("fetch");
    assert_eq!(persisted.action_count, 3);
}

#[tokio::test]
async fn invalid_line_ranges_are_rejected() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, finding) = seed(&pool).await;
    let gate = ActionGate::new(Arc::clone(&pool));

    let err = actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 0, 5)
        .await
        .expect_err("zero start line");
    assert!(matches!(err, AppError::Validation(_)));

    let err = actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 9, 3)
        .await
        .expect_err("end before start");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn evidence_on_another_sessions_finding_is_rejected() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, _) = seed(&pool).await;

    // A finding that was never assigned to the session.
    let job = Job::new("other-job".into(), "corpus-2".into());
    JobRepo::new(Arc::clone(&pool)).create(&job).await.expect("create job");
    let foreign = Finding::new(job.id, "CTRL-X".into());
    FindingRepo::new(Arc::clone(&pool)).create(&foreign).await.expect("create finding");

    let gate = ActionGate::new(Arc::clone(&pool));
    let err = actions::add_evidence(&pool, &gate, &session.id, &foreign.id, "doc-a", 1, 5)
        .await
        .expect_err("not assigned");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn judgement_requires_evidence_unless_unconfirmed() {
    let pool = Arc::new(db::connect_memory().await.expect("db connect"));
    let (session, finding) = seed(&pool).await;
    let gate = ActionGate::new(Arc::clone(&pool));

    // No evidence yet: only Unconfirmed is allowed.
    let err = actions::update_finding(
        &pool,
        &gate,
        &session.id,
        &finding.id,
        Judgement::NonConformant,
        Some("nothing found"),
    )
    .await
    .expect_err("judgement without evidence");
    assert!(matches!(err, AppError::Validation(_)));

    actions::update_finding(&pool, &gate, &session.id, &finding.id, Judgement::Unconfirmed, None)
        .await
        .expect("unconfirmed is always allowed");

    // With evidence on record the real judgement goes through.
    actions::add_evidence(&pool, &gate, &session.id, &finding.id, "doc-a", 5, 9)
        .await
        .expect("evidence");
    actions::update_finding(
        &pool,
        &gate,
        &session.id,
        &finding.id,
        Judgement::Conformant,
        Some("policy covers it"),
    )
    .await
    .expect("judgement with evidence");

    let fetched = FindingRepo::new(pool).get_by_id(&finding.id).await.expect("fetch");
    assert_eq!(fetched.judgement, Some(Judgement::Conformant));
    assert_eq!(fetched.comment.as_deref(), Some("policy covers it"));
}
