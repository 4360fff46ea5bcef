//! Configuration for embedding providers

use serde::{Deserialize, Serialize};

/// Configuration for the fastembed-backed provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Name of the embedding model to use.
    pub model_name: String,
    /// Maximum batch size for embedding generation.
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings before returning them.
    pub normalize: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            normalize: true,
        }
    }
}

impl EmbedConfig {
    /// Configuration for a named model with default batching.
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}
