//! Error taxonomy for the retrieval core.
//!
//! Failures are classified by their blast radius:
//!
//! - [`Io`](RetrieverError::Io) is local to one file — the scan skips the
//!   file, records it, and continues.
//! - [`Embedding`](RetrieverError::Embedding) is local to one chunk — the
//!   sync cycle skips the chunk, counts it in the
//!   [`SyncReport`](crate::status::SyncReport), and retries next cycle.
//! - [`CorruptState`](RetrieverError::CorruptState) means a persisted store
//!   was unreadable and has been discarded for a rebuild from scratch.
//! - [`QueryUnavailable`](RetrieverError::QueryUnavailable) fails a single
//!   query after the embedding retry budget is exhausted; the index itself
//!   stays intact.
//! - [`Config`](RetrieverError::Config) is fatal at startup.

use quarry_embed::EmbedError;
use std::path::PathBuf;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrieverError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// Per-file read/stat failure. Skip the file, report, continue.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Per-chunk embedding failure after retries. Skip the chunk, report.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// A persisted store was unreadable or malformed; it is discarded and
    /// rebuilt from scratch.
    #[error("corrupt persisted state ({what}): {detail}")]
    CorruptState { what: &'static str, detail: String },

    /// Query-time embedding failure after retries. The index is intact.
    #[error("query unavailable: {0}")]
    QueryUnavailable(#[source] EmbedError),

    /// Invalid configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Database error from the state store.
    #[error("database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },
}

impl RetrieverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(what: &'static str, detail: impl Into<String>) -> Self {
        Self::CorruptState {
            what,
            detail: detail.into(),
        }
    }
}
