//! Shared test fixtures: a deterministic embedding provider with
//! bag-of-words semantics, and a wrapper that fails on marked texts.

use async_trait::async_trait;
use quarry_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const DIMENSION: usize = 64;

/// Deterministic bag-of-words provider: each token maps to an axis, a text's
/// vector is the normalized sum of its token axes, and a tiny synonym table
/// makes paraphrases land near their sources. `DefaultHasher::new()` uses
/// fixed keys, so vectors are stable across runs.
pub struct VocabProvider {
    pub calls: AtomicUsize,
}

impl VocabProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            let folded = fold_synonym(&lowered);
            let mut hasher = DefaultHasher::new();
            folded.hash(&mut hasher);
            vector[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        vector
    }
}

fn fold_synonym(token: &str) -> &str {
    match token {
        "feline" | "kitty" => "cat",
        "rug" | "carpet" => "mat",
        "qubits" | "qubit" => "quantum",
        "canine" | "puppy" => "dog",
        other => other,
    }
}

#[async_trait]
impl EmbeddingProvider for VocabProvider {
    async fn embed_text(&self, text: &str) -> quarry_embed::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector_for(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(out))
    }

    fn embedding_dimension(&self) -> usize {
        DIMENSION
    }

    fn provider_name(&self) -> &str {
        "vocab"
    }
}

/// Wraps [`VocabProvider`] and fails (transiently) for any text containing
/// the marker while `failing` is set. Clearing the flag lets the next sync
/// cycle pick the chunk up.
pub struct FailMarkedProvider {
    inner: VocabProvider,
    marker: &'static str,
    failing: AtomicBool,
}

impl FailMarkedProvider {
    pub fn new(marker: &'static str) -> Self {
        Self {
            inner: VocabProvider::new(),
            marker,
            failing: AtomicBool::new(true),
        }
    }

    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.inner.call_count()
    }
}

#[async_trait]
impl EmbeddingProvider for FailMarkedProvider {
    async fn embed_text(&self, text: &str) -> quarry_embed::Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) && text.contains(self.marker) {
            return Err(EmbedError::unavailable("marked text rejected"));
        }
        self.inner.embed_text(text).await
    }

    async fn embed_texts(&self, texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(out))
    }

    fn embedding_dimension(&self) -> usize {
        DIMENSION
    }

    fn provider_name(&self) -> &str {
        "fail-marked"
    }
}
