//! Gated agent actions: corpus queries and finding mutations.
//!
//! Each operation authorizes through the [`ActionGate`], performs the
//! downstream call, then commits the action count and audit row. For
//! corpus queries the downstream call is the external backend; for
//! evidence/finding writes the mutation and the gate commit share one
//! transaction, so a failure rolls back both.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::backend::{CorpusBackend, DocumentSlice, GrepMatch, SearchHit};
use crate::models::action_log::ActionType;
use crate::models::evidence::Evidence;
use crate::models::finding::Judgement;
use crate::persistence::{evidence_repo, finding_repo, job_repo, SqlitePool};
use crate::{AppError, Result};

use super::action_gate::{self, ActionGate};
use super::evidence_merger;

/// Resolve the corpus id for a session's owning job.
async fn corpus_for_session(db: &SqlitePool, job_id: &str) -> Result<String> {
    let mut conn = db.acquire().await?;
    let job = job_repo::fetch_in(&mut conn, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;
    Ok(job.corpus_id)
}

/// Run a gated semantic search against the session's corpus.
///
/// # Errors
///
/// Gate failures surface as `NotFound`/`Forbidden`; backend failures as
/// `AppError::Backend` (never retried here).
pub async fn search(
    db: &Arc<SqlitePool>,
    gate: &ActionGate,
    backend: &dyn CorpusBackend,
    session_id: &str,
    query: &str,
    limit: u32,
) -> Result<Vec<SearchHit>> {
    let session = gate.authorize(session_id).await?;
    let corpus_id = corpus_for_session(db, &session.job_id).await?;

    let hits = backend.search(&corpus_id, query, limit).await?;

    gate.commit(
        session_id,
        ActionType::Search,
        json!({ "corpus_id": corpus_id, "query": query, "limit": limit }),
        &format!("{} hit(s)", hits.len()),
    )
    .await?;
    Ok(hits)
}

/// Read a gated line range from a corpus document.
///
/// # Errors
///
/// Gate failures surface as `NotFound`/`Forbidden`; backend failures as
/// `AppError::Backend`.
pub async fn read(
    db: &Arc<SqlitePool>,
    gate: &ActionGate,
    backend: &dyn CorpusBackend,
    session_id: &str,
    document_ref: &str,
    start_line: i64,
    end_line: i64,
) -> Result<DocumentSlice> {
    let session = gate.authorize(session_id).await?;
    let corpus_id = corpus_for_session(db, &session.job_id).await?;

    let slice = backend
        .read(&corpus_id, document_ref, start_line, end_line)
        .await?;

    gate.commit(
        session_id,
        ActionType::Read,
        json!({
            "corpus_id": corpus_id,
            "document_ref": document_ref,
            "start_line": start_line,
            "end_line": end_line,
        }),
        &format!("{} line(s) read", slice.lines.len()),
    )
    .await?;
    Ok(slice)
}

/// Run a gated pattern match against the session's corpus.
///
/// # Errors
///
/// Gate failures surface as `NotFound`/`Forbidden`; backend failures as
/// `AppError::Backend`.
pub async fn grep(
    db: &Arc<SqlitePool>,
    gate: &ActionGate,
    backend: &dyn CorpusBackend,
    session_id: &str,
    pattern: &str,
    limit: u32,
) -> Result<Vec<GrepMatch>> {
    let session = gate.authorize(session_id).await?;
    let corpus_id = corpus_for_session(db, &session.job_id).await?;

    let matches = backend.grep(&corpus_id, pattern, limit).await?;

    gate.commit(
        session_id,
        ActionType::Grep,
        json!({ "corpus_id": corpus_id, "pattern": pattern, "limit": limit }),
        &format!("{} match(es)", matches.len()),
    )
    .await?;
    Ok(matches)
}

/// Attach an evidence citation to a finding and re-merge its spans.
///
/// Insert, merge, counter increment, and audit row share one
/// transaction. Returns the finding's full evidence set after merging.
///
/// # Errors
///
/// - `AppError::Validation` — invalid line range or finding not assigned
///   to this session.
/// - `AppError::NotFound` / `AppError::Forbidden` — gate failures.
pub async fn add_evidence(
    db: &Arc<SqlitePool>,
    gate: &ActionGate,
    session_id: &str,
    finding_id: &str,
    document_ref: &str,
    start_line: i64,
    end_line: i64,
) -> Result<Vec<Evidence>> {
    gate.authorize(session_id).await?;

    if start_line < 1 || end_line < start_line {
        return Err(AppError::Validation(format!(
            "invalid line range {start_line}..{end_line} (1-indexed, inclusive)"
        )));
    }

    let mut tx = db.begin().await?;

    let finding = finding_repo::fetch_in(&mut tx, finding_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("finding {finding_id} not found")))?;
    if finding.session_id.as_deref() != Some(session_id) {
        return Err(AppError::Validation(format!(
            "finding {finding_id} is not assigned to session {session_id}"
        )));
    }

    let evidence = Evidence::new(
        finding_id.to_owned(),
        document_ref.to_owned(),
        start_line,
        end_line,
    );
    evidence_repo::create_in(&mut tx, &evidence).await?;
    evidence_merger::merge_finding_evidence_in(&mut tx, finding_id).await?;

    action_gate::commit_in(
        &mut tx,
        session_id,
        ActionType::AddEvidence,
        json!({
            "finding_id": finding_id,
            "document_ref": document_ref,
            "start_line": start_line,
            "end_line": end_line,
        }),
        "evidence recorded",
    )
    .await?;

    let merged = evidence_repo::list_for_finding_in(&mut tx, finding_id).await?;
    tx.commit().await?;

    info!(session_id, finding_id, document_ref, "evidence added");
    Ok(merged)
}

/// Write a judgement and comment to a finding.
///
/// Any judgement other than `Unconfirmed` requires the finding to
/// already carry at least one evidence citation.
///
/// # Errors
///
/// - `AppError::Validation` — judgement without evidence, or finding not
///   assigned to this session.
/// - `AppError::NotFound` / `AppError::Forbidden` — gate failures.
pub async fn update_finding(
    db: &Arc<SqlitePool>,
    gate: &ActionGate,
    session_id: &str,
    finding_id: &str,
    judgement: Judgement,
    comment: Option<&str>,
) -> Result<()> {
    gate.authorize(session_id).await?;

    let mut tx = db.begin().await?;

    let finding = finding_repo::fetch_in(&mut tx, finding_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("finding {finding_id} not found")))?;
    if finding.session_id.as_deref() != Some(session_id) {
        return Err(AppError::Validation(format!(
            "finding {finding_id} is not assigned to session {session_id}"
        )));
    }

    if judgement != Judgement::Unconfirmed {
        let (evidence_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM evidence WHERE finding_id = ?1")
                .bind(finding_id)
                .fetch_one(&mut *tx)
                .await?;
        if evidence_count == 0 {
            return Err(AppError::Validation(format!(
                "finding {finding_id} cannot be judged '{}' without evidence",
                judgement.as_str()
            )));
        }
    }

    finding_repo::set_judgement_in(&mut tx, finding_id, judgement, comment).await?;

    action_gate::commit_in(
        &mut tx,
        session_id,
        ActionType::UpdateFinding,
        json!({
            "finding_id": finding_id,
            "judgement": judgement.as_str(),
            "comment": comment,
        }),
        &format!("judged {}", judgement.as_str()),
    )
    .await?;

    tx.commit().await?;
    info!(session_id, finding_id, judgement = judgement.as_str(), "finding updated");
    Ok(())
}
