//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Referenced session/job/finding/queue entry does not exist.
    NotFound(String),
    /// Valid entity but wrong lifecycle state or exhausted limit.
    Forbidden(String),
    /// Submission or finding update rejected; names the offending items.
    Validation(String),
    /// Lifecycle trigger fired from a non-source state.
    Transition(String),
    /// Process Runner handoff could not be invoked; recovered by rollback.
    Dispatch(String),
    /// Knowledge backend (search/read/grep) communication failure.
    Backend(String),
    /// External agent process exited non-zero or timed out.
    AgentProcess(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Transition(msg) => write!(f, "transition: {msg}"),
            Self::Dispatch(msg) => write!(f, "dispatch: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::AgentProcess(msg) => write!(f, "agent process: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
