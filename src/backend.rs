//! Knowledge-backend interface: corpus search, document read, and grep.
//!
//! The backend itself is an external collaborator; this module only
//! defines the contract the Action Gate proxies through. Failures map to
//! [`AppError::Backend`](crate::AppError::Backend) without retry.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One semantic-search hit within a corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SearchHit {
    /// Document reference the hit was found in.
    pub document_ref: String,
    /// Line where the hit starts (1-indexed).
    pub line: i64,
    /// Short excerpt around the hit.
    pub snippet: String,
}

/// A contiguous slice of document lines returned by `read`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DocumentSlice {
    /// Document the lines came from.
    pub document_ref: String,
    /// First returned line number (1-indexed).
    pub start_line: i64,
    /// The lines, in document order.
    pub lines: Vec<String>,
}

/// One pattern match returned by `grep`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GrepMatch {
    /// Document the match was found in.
    pub document_ref: String,
    /// Matching line number (1-indexed).
    pub line: i64,
    /// Full matching line text.
    pub text: String,
}

/// Contract the external search/read/grep backend must satisfy.
///
/// Implementations live outside this crate (HTTP client, test stub);
/// every method failure must surface as `AppError::Backend`.
pub trait CorpusBackend: Send + Sync {
    /// Run a semantic search over the corpus.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on any
    /// upstream communication failure.
    fn search(
        &self,
        corpus_id: &str,
        query: &str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SearchHit>>> + Send + '_>>;

    /// Read an inclusive 1-indexed line range from a document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on any
    /// upstream communication failure.
    fn read(
        &self,
        corpus_id: &str,
        document_ref: &str,
        start_line: i64,
        end_line: i64,
    ) -> Pin<Box<dyn Future<Output = Result<DocumentSlice>> + Send + '_>>;

    /// Pattern-match across the corpus.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on any
    /// upstream communication failure.
    fn grep(
        &self,
        corpus_id: &str,
        pattern: &str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GrepMatch>>> + Send + '_>>;
}
