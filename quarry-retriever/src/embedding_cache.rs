//! Content-hash keyed embedding cache.
//!
//! Vectors are keyed by the blake3 hash of the chunk text alone, so any
//! chunk whose text has been seen before — in a previous cycle, a previous
//! process, or at a different offset after an edit — is served from the
//! cache with zero provider calls. Entries persist in the `embeddings`
//! table as f16 BLOBs and survive restarts and full index rebuilds.
//!
//! There is no size- or age-based eviction: the cache grows with distinct
//! content ever seen. [`compact`](EmbeddingCache::compact) is an optional
//! maintenance pass that prunes entries no longer referenced by any live
//! chunk; it is not part of the read/write contract.
//!
//! The first vector accepted fixes the working dimension. A cached entry
//! whose dimension disagrees with the current provider (a model swap) is
//! treated as a miss and overwritten rather than served.

use crate::error::Result;
use half::f16;
use quarry_context::Chunk;
use quarry_embed::{EmbeddingProvider, RetryPolicy};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::warn;

/// Whether `get_or_compute` served from the cache or called the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Computed,
}

/// Persistent text-hash → vector cache.
#[derive(Clone, Debug)]
pub struct EmbeddingCache {
    pool: SqlitePool,
}

impl EmbeddingCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a cached vector for `text_hash`, if present, fresh, and of the
    /// expected dimension.
    pub async fn get(&self, text_hash: &[u8; 32], expected_dim: usize) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query(
            "SELECT dimension, vector, stale FROM embeddings WHERE text_hash = ?1",
        )
        .bind(&text_hash[..])
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stale: i64 = row.get("stale");
        let dimension: i64 = row.get("dimension");
        if stale != 0 || dimension as usize != expected_dim {
            return Ok(None);
        }

        let blob: Vec<u8> = row.get("vector");
        if blob.len() != expected_dim * 2 {
            // Self-heal: a truncated blob is a miss, not a crash.
            warn!("cached embedding has a malformed vector blob; recomputing");
            return Ok(None);
        }

        let halves: Vec<f16> = bytemuck::pod_collect_to_vec(&blob);
        Ok(Some(halves.into_iter().map(f32::from).collect()))
    }

    /// Store a vector under `text_hash`, replacing any previous entry.
    pub async fn put(&self, text_hash: &[u8; 32], vector: &[f32]) -> Result<()> {
        let halves: Vec<f16> = vector.iter().map(|&x| f16::from_f32(x)).collect();
        let blob = bytemuck::cast_slice::<f16, u8>(&halves);

        sqlx::query(
            r#"
            INSERT INTO embeddings (text_hash, dimension, vector, stale)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT(text_hash) DO UPDATE SET
                dimension = excluded.dimension,
                vector = excluded.vector,
                stale = 0
            "#,
        )
        .bind(&text_hash[..])
        .bind(vector.len() as i64)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark an entry stale so the next lookup recomputes it.
    pub async fn mark_stale(&self, text_hash: &[u8; 32]) -> Result<()> {
        sqlx::query("UPDATE embeddings SET stale = 1 WHERE text_hash = ?1")
            .bind(&text_hash[..])
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cache hit → stored vector, no provider call. Miss → provider call
    /// under `policy`, store, return.
    pub async fn get_or_compute(
        &self,
        chunk: &Chunk,
        provider: &dyn EmbeddingProvider,
        policy: &RetryPolicy,
    ) -> Result<(Vec<f32>, CacheOutcome)> {
        if let Some(vector) = self
            .get(&chunk.text_hash, provider.embedding_dimension())
            .await?
        {
            return Ok((vector, CacheOutcome::Hit));
        }

        let vector = policy.embed_text(provider, &chunk.text).await?;
        self.put(&chunk.text_hash, &vector).await?;
        Ok((vector, CacheOutcome::Computed))
    }

    /// Maintenance: delete entries whose hash no longer appears in any live
    /// chunk. Returns the number of pruned entries.
    pub async fn compact(&self, live_hashes: &HashSet<[u8; 32]>) -> Result<usize> {
        let rows = sqlx::query("SELECT text_hash FROM embeddings")
            .fetch_all(&self.pool)
            .await?;

        let mut pruned = 0usize;
        for row in rows {
            let hash_bytes: Vec<u8> = row.get("text_hash");
            let keep = hash_bytes
                .as_slice()
                .try_into()
                .map(|hash: [u8; 32]| live_hashes.contains(&hash))
                .unwrap_or(false);
            if !keep {
                sqlx::query("DELETE FROM embeddings WHERE text_hash = ?1")
                    .bind(&hash_bytes[..])
                    .execute(&self.pool)
                    .await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Number of cached vectors.
    pub async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StateDb;
    use async_trait::async_trait;
    use quarry_context::{Chunker, ChunkerConfig};
    use quarry_embed::{EmbedError, EmbeddingResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        dimension: usize,
    }

    impl CountingProvider {
        fn new(dimension: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dimension,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_text(&self, text: &str) -> quarry_embed::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Deterministic vector from the text bytes.
            let mut vector = vec![0.0f32; self.dimension];
            for (i, b) in text.bytes().enumerate() {
                vector[i % self.dimension] += b as f32;
            }
            Ok(vector)
        }

        async fn embed_texts(&self, texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed_text(text).await?);
            }
            Ok(EmbeddingResult::new(out))
        }

        fn embedding_dimension(&self) -> usize {
            self.dimension
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed_text(&self, _text: &str) -> quarry_embed::Result<Vec<f32>> {
            Err(EmbedError::malformed("nope"))
        }

        async fn embed_texts(&self, _texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
            Err(EmbedError::malformed("nope"))
        }

        fn embedding_dimension(&self) -> usize {
            4
        }

        fn provider_name(&self) -> &str {
            "failing"
        }
    }

    fn one_chunk(text: &str) -> Chunk {
        let chunker = Chunker::new(ChunkerConfig::new(10_000, 100));
        chunker.chunk("a.md", text).remove(0)
    }

    async fn cache() -> EmbeddingCache {
        let db = StateDb::open_memory().await.unwrap();
        EmbeddingCache::new(db.pool().clone())
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit_with_no_provider_call() {
        let cache = cache().await;
        let provider = CountingProvider::new(4);
        let policy = RetryPolicy::default();
        let chunk = one_chunk("some note text");

        let (first, outcome) = cache
            .get_or_compute(&chunk, &provider, &policy)
            .await
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let (second, outcome) = cache
            .get_or_compute(&chunk, &provider, &policy)
            .await
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // f16 round-trip keeps values close.
        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a - b).abs() < 0.5, "{a} vs {b}");
        }
    }

    #[tokio::test]
    async fn identical_text_in_different_documents_shares_one_entry() {
        let cache = cache().await;
        let provider = CountingProvider::new(4);
        let policy = RetryPolicy::default();

        let chunker = Chunker::new(ChunkerConfig::new(10_000, 100));
        let a = chunker.chunk("a.md", "shared paragraph").remove(0);
        let b = chunker.chunk("b.md", "shared paragraph").remove(0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.text_hash, b.text_hash);

        cache.get_or_compute(&a, &provider, &policy).await.unwrap();
        let (_, outcome) = cache.get_or_compute(&b, &provider, &policy).await.unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_treated_as_a_miss() {
        let cache = cache().await;
        let policy = RetryPolicy::default();
        let chunk = one_chunk("note text");

        let old_model = CountingProvider::new(4);
        cache
            .get_or_compute(&chunk, &old_model, &policy)
            .await
            .unwrap();

        let new_model = CountingProvider::new(8);
        let (vector, outcome) = cache
            .get_or_compute(&chunk, &new_model, &policy)
            .await
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(vector.len(), 8);
    }

    #[tokio::test]
    async fn stale_entries_are_recomputed() {
        let cache = cache().await;
        let provider = CountingProvider::new(4);
        let policy = RetryPolicy::default();
        let chunk = one_chunk("note text");

        cache
            .get_or_compute(&chunk, &provider, &policy)
            .await
            .unwrap();
        cache.mark_stale(&chunk.text_hash).await.unwrap();

        let (_, outcome) = cache
            .get_or_compute(&chunk, &provider, &policy)
            .await
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_failure_leaves_the_cache_unpopulated() {
        let cache = cache().await;
        let policy = RetryPolicy::default();
        let chunk = one_chunk("note text");

        let err = cache
            .get_or_compute(&chunk, &FailingProvider, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RetrieverError::Embedding(_)));
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compact_prunes_unreferenced_hashes() {
        let cache = cache().await;
        let provider = CountingProvider::new(4);
        let policy = RetryPolicy::default();

        let keep = one_chunk("keep me around");
        let drop = one_chunk("drop me entirely");
        cache.get_or_compute(&keep, &provider, &policy).await.unwrap();
        cache.get_or_compute(&drop, &provider, &policy).await.unwrap();

        let live: HashSet<[u8; 32]> = [keep.text_hash].into_iter().collect();
        let pruned = cache.compact(&live).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
