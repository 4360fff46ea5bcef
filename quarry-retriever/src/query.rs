//! Query engine: embed, search, deduplicate, assemble.
//!
//! A query embeds the query text (same retry/timeout policy as indexing;
//! persistent failure surfaces as
//! [`QueryUnavailable`](crate::error::RetrieverError::QueryUnavailable)
//! and leaves the index untouched), over-fetches candidates from the
//! current snapshot, and deduplicates overlapping spans from the same
//! document before returning the top `k` provenance-tagged results.
//!
//! Two hits conflict when they come from the same document and their
//! offset ranges overlap by more than half the shorter span; the
//! higher-scoring one survives. The over-fetch factor keeps dedup from
//! starving the result list.

use crate::context::RetrieverContext;
use crate::error::{Result, RetrieverError};
use crate::vector_index::SearchHit;
use quarry_embed::{EmbeddingProvider, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Candidates fetched per requested result before deduplication.
const OVERFETCH_FACTOR: usize = 4;
/// Minimum extra candidates fetched regardless of `k`.
const OVERFETCH_FLOOR: usize = 8;

/// One ranked retrieval result with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub path: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub score: f32,
}

/// Read-side of the retriever: answers similarity queries against the
/// currently published snapshot.
pub struct QueryEngine {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    context: Arc<RetrieverContext>,
    top_k_default: usize,
}

impl QueryEngine {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        context: Arc<RetrieverContext>,
        top_k_default: usize,
    ) -> Self {
        Self {
            provider,
            retry,
            context,
            top_k_default,
        }
    }

    /// Search the current snapshot. An empty query or an empty corpus
    /// yields an empty result list, never an error.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<SearchResult>> {
        let k = k.unwrap_or(self.top_k_default);
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Snapshot is pinned for the whole query; a publish mid-flight
        // does not affect us.
        let snapshot = self.context.current_snapshot();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .retry
            .embed_text(self.provider.as_ref(), query)
            .await
            .map_err(RetrieverError::QueryUnavailable)?;

        let overfetch = (k * OVERFETCH_FACTOR).max(k + OVERFETCH_FLOOR);
        let hits = snapshot.search(&vector, overfetch);
        debug!(
            "query matched {} candidate(s) in snapshot v{}",
            hits.len(),
            snapshot.version()
        );

        let survivors = dedup_hits(hits, k);
        Ok(survivors
            .into_iter()
            .map(|hit| SearchResult {
                text: hit.entry.text.clone(),
                path: hit.entry.path.clone(),
                start_offset: hit.entry.start,
                end_offset: hit.entry.end,
                score: hit.score,
            })
            .collect())
    }
}

/// Keep the top `k` hits after dropping lower-scored hits that overlap a
/// surviving hit from the same document by more than half the shorter
/// span. `hits` must already be in descending score order.
pub(crate) fn dedup_hits(hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    let mut survivors: Vec<SearchHit> = Vec::with_capacity(k);
    for hit in hits {
        if survivors.len() == k {
            break;
        }
        let conflicts = survivors.iter().any(|kept| {
            kept.entry.path == hit.entry.path
                && spans_conflict(
                    kept.entry.start,
                    kept.entry.end,
                    hit.entry.start,
                    hit.entry.end,
                )
        });
        if !conflicts {
            survivors.push(hit);
        }
    }
    survivors
}

/// True when the ranges overlap by more than half the shorter span.
fn spans_conflict(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    let overlap = a_end.min(b_end).saturating_sub(a_start.max(b_start));
    let shorter = (a_end - a_start).min(b_end - b_start);
    overlap * 2 > shorter
}
