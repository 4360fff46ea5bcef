//! Configuration for the retrieval core.
//!
//! All knobs live in [`RetrieverConfig`], loadable from a TOML file or
//! assembled with builder methods. Validation happens once at startup;
//! a configuration with no usable watch roots or a degenerate chunk window
//! is fatal there, never later.

use crate::error::{Result, RetrieverError};
use quarry_context::ChunkerConfig;
use quarry_embed::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the retriever: what to watch, how to chunk it, and how
/// patiently to talk to the embedding backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Directories whose documents are indexed.
    pub watch_roots: Vec<PathBuf>,
    /// File extensions (with leading dot) considered indexable.
    pub extensions: Vec<String>,
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in bytes.
    pub chunk_overlap: usize,
    /// Result count when the caller does not specify `k`.
    pub top_k_default: usize,
    /// Seconds between periodic sync cycles.
    pub sync_interval_secs: u64,
    /// Deadline in seconds for each embedding call.
    pub embedding_timeout_secs: u64,
    /// Corpora at or below this entry count are always searched exactly.
    pub exact_search_threshold: usize,
    /// Retries after the first attempt for transient embedding failures.
    pub max_embed_retries: u32,
    /// Where the state database lives; defaults to the first watch root.
    pub state_dir: Option<PathBuf>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            watch_roots: Vec::new(),
            extensions: vec![".md".to_string(), ".txt".to_string()],
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k_default: 3,
            sync_interval_secs: 30,
            embedding_timeout_secs: 30,
            exact_search_threshold: 4096,
            max_embed_retries: 3,
            state_dir: None,
        }
    }
}

impl RetrieverConfig {
    /// Configuration watching the given roots, defaults everywhere else.
    pub fn new(watch_roots: Vec<PathBuf>) -> Self {
        Self {
            watch_roots,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RetrieverError::io(path, e))?;
        toml::from_str(&raw).map_err(|e| RetrieverError::Config(format!("{}: {e}", path.display())))
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_top_k_default(mut self, top_k: usize) -> Self {
        self.top_k_default = top_k;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_exact_search_threshold(mut self, threshold: usize) -> Self {
        self.exact_search_threshold = threshold;
        self
    }

    pub fn with_state_dir(mut self, state_dir: PathBuf) -> Self {
        self.state_dir = Some(state_dir);
        self
    }

    /// Check the configuration. Called once at startup; violations here are
    /// fatal to the index manager.
    pub fn validate(&self) -> Result<()> {
        if self.watch_roots.is_empty() {
            return Err(RetrieverError::Config(
                "no watch roots configured".to_string(),
            ));
        }
        if !self.watch_roots.iter().any(|root| root.is_dir()) {
            return Err(RetrieverError::Config(format!(
                "none of the watch roots exist: {:?}",
                self.watch_roots
            )));
        }
        self.chunker_config()
            .validate()
            .map_err(RetrieverError::Config)?;
        if self.extensions.is_empty() {
            return Err(RetrieverError::Config(
                "no file extensions configured".to_string(),
            ));
        }
        if self.top_k_default == 0 {
            return Err(RetrieverError::Config(
                "top_k_default must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.chunk_size, self.chunk_overlap)
    }

    /// Retry policy for embedding calls, derived from the configured
    /// timeout and retry budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_timeout(self.embedding_timeout())
            .with_max_retries(self.max_embed_retries)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    /// Directory holding the state database.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.watch_roots.first().cloned().unwrap_or_else(|| ".".into()))
    }

    /// Whether a path's extension is configured as indexable.
    pub fn matches_extension(&self, path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => {
                let dotted = format!(".{ext}");
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&dotted))
            }
            None => false,
        }
    }
}
