//! quarry-retriever: local semantic retrieval over plain-text notes.
//!
//! This crate watches a set of directories of text/markdown documents,
//! incrementally maintains a content-addressed vector index over them, and
//! answers similarity queries with ranked, provenance-tagged passages.
//!
//! ## Key Modules
//!
//! - **[`content_store`]**: per-document identity and change detection
//! - **[`embedding_cache`]**: content-hash keyed vector cache
//! - **[`vector_index`]**: immutable snapshot index with cosine search
//! - **[`index_manager`]**: the single-writer sync state machine
//! - **[`query`]**: over-fetching, deduplicating query engine
//! - **[`context`]**: the shared snapshot pointer and shutdown flag
//! - **[`storage`]**: the SQLite state database
//!
//! ## Architecture
//!
//! ```text
//! Files → ContentStore → Chunker → EmbeddingCache/Provider → Snapshot
//!   ↑                                                           ↓
//! sync cadence ← IndexManager ——— publish (atomic swap) ——→ QueryEngine
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_retriever::config::RetrieverConfig;
//! use quarry_retriever::context::RetrieverContext;
//! use quarry_retriever::index_manager::IndexManager;
//! use quarry_retriever::query::QueryEngine;
//! use quarry_embed::{EmbedConfig, FastEmbedProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::new(vec!["./notes".into()]);
//! let provider = Arc::new(FastEmbedProvider::create(EmbedConfig::default()).await?);
//! let context = RetrieverContext::new();
//!
//! let manager = IndexManager::new(config.clone(), provider.clone(), context.clone()).await?;
//! let engine = QueryEngine::new(
//!     provider,
//!     config.retry_policy(),
//!     context.clone(),
//!     config.top_k_default,
//! );
//!
//! manager.sync_once().await?;
//! let results = engine.search("what did I write about lifetimes?", None).await?;
//! for result in results {
//!     println!("{} ({:.3}): {}", result.path, result.score, result.text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! One background task runs [`IndexManager::run`] while any number of
//! concurrent queries read the published snapshot; publishing is a single
//! atomic swap, so a query never observes a half-updated index.

pub mod config;
pub mod content_store;
pub mod context;
pub mod embedding_cache;
pub mod error;
pub mod index_manager;
pub mod query;
pub mod status;
pub mod storage;
pub mod vector_index;

pub use config::RetrieverConfig;
pub use context::RetrieverContext;
pub use error::{Result, RetrieverError};
pub use index_manager::{IndexManager, SyncPhase};
pub use query::{QueryEngine, SearchResult};
pub use status::{IndexStatus, SyncReport};
