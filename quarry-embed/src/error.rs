//! Error types for the embedding adapter

use std::time::Duration;

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// The variants split along the axis the rest of the system cares about:
/// transient backend trouble ([`Unavailable`](EmbedError::Unavailable),
/// [`Timeout`](EmbedError::Timeout)) is retried with backoff, while input
/// and configuration problems ([`Malformed`](EmbedError::Malformed),
/// [`InvalidConfig`](EmbedError::InvalidConfig),
/// [`DimensionMismatch`](EmbedError::DimensionMismatch)) fail immediately.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedding backend is not usable right now (model not loaded,
    /// runtime failure, resource exhaustion).
    #[error("embedding backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// The embedding call exceeded its deadline.
    #[error("embedding timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The input text cannot be embedded (e.g., empty input).
    #[error("malformed embedding input: {message}")]
    Malformed { message: String },

    /// A vector with an unexpected dimension was produced.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider configuration is invalid.
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// IO errors when touching model files.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors.
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries.
    #[error("external error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Backend-unavailable error with a reason string.
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Malformed-input error with a message.
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Invalid-configuration error with a message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether retrying this error might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}
