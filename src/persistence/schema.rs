//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates all six tables idempotently. Safe to call on every startup.
/// The partial unique index on `execution_queue` backs the global
/// single-flight invariant: at most one row may be `processing`.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS job (
    id              TEXT PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL,
    corpus_id       TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','assessing','completed')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    job_id          TEXT NOT NULL REFERENCES job(id) ON DELETE CASCADE,
    status          TEXT NOT NULL CHECK(status IN ('ready_for_assessment','assessing_controls','submitted_for_review','completed','abandoned','failed')),
    action_count    INTEGER NOT NULL DEFAULT 0,
    action_limit    INTEGER NOT NULL,
    error_count     INTEGER NOT NULL DEFAULT 0,
    error_limit     INTEGER NOT NULL,
    warning_count   INTEGER NOT NULL DEFAULT 0,
    warning_limit   INTEGER NOT NULL,
    timeout_seconds INTEGER NOT NULL,
    log_path        TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS finding (
    id              TEXT PRIMARY KEY NOT NULL,
    job_id          TEXT NOT NULL REFERENCES job(id) ON DELETE CASCADE,
    control_item_id TEXT NOT NULL,
    session_id      TEXT REFERENCES session(id) ON DELETE SET NULL,
    judgement       TEXT CHECK(judgement IN ('conformant','non_conformant','partially_conformant','not_applicable','unconfirmed')),
    comment         TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evidence (
    id              TEXT PRIMARY KEY NOT NULL,
    finding_id      TEXT NOT NULL REFERENCES finding(id) ON DELETE CASCADE,
    document_ref    TEXT NOT NULL,
    start_line      INTEGER NOT NULL,
    end_line        INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_queue (
    id               TEXT PRIMARY KEY NOT NULL,
    session_id       TEXT NOT NULL,
    job_id           TEXT NOT NULL,
    status           TEXT NOT NULL CHECK(status IN ('pending','processing','completed')),
    priority         INTEGER NOT NULL DEFAULT 0,
    execution_config TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_log (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    action_type     TEXT NOT NULL CHECK(action_type IN ('search','read','grep','add_evidence','update_finding')),
    parameters      TEXT NOT NULL,
    result_summary  TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_job ON session(job_id);
CREATE INDEX IF NOT EXISTS idx_finding_job ON finding(job_id);
CREATE INDEX IF NOT EXISTS idx_finding_session ON finding(session_id);
CREATE INDEX IF NOT EXISTS idx_evidence_finding ON evidence(finding_id);
CREATE INDEX IF NOT EXISTS idx_queue_session ON execution_queue(session_id);
CREATE INDEX IF NOT EXISTS idx_action_log_session ON action_log(session_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_single_processing
    ON execution_queue(status) WHERE status = 'processing';
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
