//! Persistence layer modules.

pub mod action_log_repo;
pub mod db;
pub mod evidence_repo;
pub mod finding_repo;
pub mod job_repo;
pub mod queue_repo;
pub mod schema;
pub mod session_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
