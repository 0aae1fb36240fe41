//! Evidence span consolidation.
//!
//! After every evidence insertion the affected finding's citations are
//! re-coalesced per document: ranges that overlap, or sit within
//! [`MERGE_LINE_DISTANCE`] lines of each other, collapse into one record
//! spanning `min(starts)..max(ends)`. Running the merge twice with no
//! new evidence is a no-op.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::debug;

use crate::models::evidence::Evidence;
use crate::persistence::evidence_repo;
use crate::Result;

/// Maximum line gap between two ranges that still coalesce.
pub const MERGE_LINE_DISTANCE: i64 = 5;

/// Coalesce inclusive line ranges, assuming nothing about input order.
///
/// Two ranges merge when they overlap (`current.end >= next.start`) or
/// the gap between them is at most [`MERGE_LINE_DISTANCE`] lines.
#[must_use]
pub fn coalesce_spans(spans: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut sorted: Vec<(i64, i64)> = spans.to_vec();
    sorted.sort_unstable();

    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some((_, last_end)) if *last_end >= start || start - *last_end <= MERGE_LINE_DISTANCE => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Merge a finding's evidence set in place, per document.
///
/// Documents whose ranges are already coalesced are left untouched, so
/// repeated runs with no new evidence keep the same records (idempotent
/// down to the row ids). Callers run this inside the transaction that
/// inserted the new evidence.
///
/// # Errors
///
/// Returns `AppError::Db` if loading or replacing evidence fails.
pub async fn merge_finding_evidence_in(conn: &mut SqliteConnection, finding_id: &str) -> Result<()> {
    let all = evidence_repo::list_for_finding_in(conn, finding_id).await?;

    let mut by_document: BTreeMap<String, Vec<Evidence>> = BTreeMap::new();
    for evidence in all {
        by_document
            .entry(evidence.document_ref.clone())
            .or_default()
            .push(evidence);
    }

    for (document_ref, group) in by_document {
        let spans: Vec<(i64, i64)> = group.iter().map(|e| (e.start_line, e.end_line)).collect();
        let merged = coalesce_spans(&spans);
        if merged == spans {
            continue;
        }

        debug!(
            finding_id,
            document_ref,
            before = spans.len(),
            after = merged.len(),
            "coalescing evidence ranges"
        );

        let replacements: Vec<Evidence> = merged
            .into_iter()
            .map(|(start_line, end_line)| {
                Evidence::new(
                    finding_id.to_owned(),
                    document_ref.clone(),
                    start_line,
                    end_line,
                )
            })
            .collect();
        evidence_repo::replace_for_document_in(conn, finding_id, &document_ref, &replacements)
            .await?;
    }

    Ok(())
}
