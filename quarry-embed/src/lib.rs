//! # quarry-embed
//!
//! Embedding adapter for the quarry retrieval system: a small trait over
//! text → fixed-dimension vector, a fastembed-backed implementation running
//! local ONNX models, and the timeout/retry policy the rest of the system
//! wraps around every call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use quarry_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider, RetryPolicy};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let policy = RetryPolicy::default();
//! let vector = policy.embed_text(&provider, "hello world").await?;
//! println!("dimension: {}", vector.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`provider`]: the [`EmbeddingProvider`] trait and the fastembed
//!   implementation with a process-wide model cache
//! - [`retry`]: deadline + exponential backoff around provider calls
//! - [`config`]: model selection and batching options
//! - [`error`]: the failure taxonomy — transient backend trouble vs.
//!   malformed input
//!
//! The retrieval core injects the provider as `Arc<dyn EmbeddingProvider>`
//! and never assumes a specific model; the vector dimension is discovered
//! at load time and validated on every call.

pub mod config;
pub mod error;
pub mod provider;
pub mod retry;

pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
pub use retry::RetryPolicy;
