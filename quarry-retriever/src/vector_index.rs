//! Immutable snapshot vector index with approximate nearest-neighbor search.
//!
//! The index is a sequence of [`IndexEntry`]s (chunk id, normalized vector,
//! provenance) frozen into a [`Snapshot`]. Snapshots are never mutated:
//! incremental updates derive a new snapshot from the previous one, sharing
//! the `Arc`s of unchanged entries so the rebuild cost is proportional to
//! the delta, not to the corpus.
//!
//! ## Similarity
//!
//! Vectors are L2-normalized when an entry is created, so cosine similarity
//! reduces to the inner product. Search returns exactly
//! `min(k, entries)` hits ordered by descending score; equal scores are
//! broken by ascending chunk id so results are deterministic.
//!
//! ## Approximation
//!
//! Corpora at or below the exact-search threshold are always scanned
//! exhaustively. Above it, entries are grouped by coarse clustering
//! (k-means over the normalized vectors, deterministic seeding) and a query
//! probes only the nearest clusters; if probing yields fewer than `k`
//! candidates the search falls back to the full scan, so the result-count
//! contract holds at every size.

use quarry_context::{Chunk, ChunkId};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The unit stored in the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: ChunkId,
    pub path: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub text_hash: [u8; 32],
    /// L2-normalized embedding.
    pub vector: Vec<f32>,
}

impl IndexEntry {
    /// Build an entry from a chunk and its raw embedding; the vector is
    /// normalized here so scoring is a plain inner product.
    pub fn from_chunk(chunk: &Chunk, mut vector: Vec<f32>) -> Arc<Self> {
        normalize(&mut vector);
        Arc::new(Self {
            chunk_id: chunk.id,
            path: chunk.path.clone(),
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
            text_hash: chunk.text_hash,
            vector,
        })
    }
}

/// One search result: an entry and its similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Arc<IndexEntry>,
    pub score: f32,
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Coarse clustering over the entries of one snapshot.
#[derive(Debug)]
struct ClusterIndex {
    centroids: Vec<Vec<f32>>,
    /// Entry indices per centroid.
    members: Vec<Vec<u32>>,
}

const KMEANS_ITERATIONS: usize = 8;

impl ClusterIndex {
    /// Build `~sqrt(n)` clusters with deterministic seeding: initial
    /// centroids are entries evenly spaced in id-sorted order.
    fn build(entries: &[Arc<IndexEntry>]) -> Self {
        let n = entries.len();
        let k = (n as f64).sqrt().ceil() as usize;
        let k = k.clamp(1, n);

        let mut centroids: Vec<Vec<f32>> =
            (0..k).map(|i| entries[i * n / k].vector.clone()).collect();
        let mut members: Vec<Vec<u32>> = vec![Vec::new(); k];

        for _ in 0..KMEANS_ITERATIONS {
            for member_list in members.iter_mut() {
                member_list.clear();
            }
            for (idx, entry) in entries.iter().enumerate() {
                let best = nearest_centroid(&centroids, &entry.vector);
                members[best].push(idx as u32);
            }
            for (centroid, member_list) in centroids.iter_mut().zip(members.iter()) {
                if member_list.is_empty() {
                    continue; // keep the previous centroid
                }
                let dim = centroid.len();
                let mut mean = vec![0.0f32; dim];
                for &idx in member_list {
                    for (m, v) in mean.iter_mut().zip(&entries[idx as usize].vector) {
                        *m += v;
                    }
                }
                let count = member_list.len() as f32;
                for m in mean.iter_mut() {
                    *m /= count;
                }
                normalize(&mut mean);
                *centroid = mean;
            }
        }

        Self { centroids, members }
    }

    /// Entry indices in the `nprobe` clusters nearest to the query.
    fn probe(&self, query: &[f32]) -> Vec<u32> {
        let nprobe = ((self.centroids.len() as f64).sqrt().ceil() as usize)
            .clamp(1, self.centroids.len());

        let mut ranked: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (dot(c, query), i))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        ranked
            .iter()
            .take(nprobe)
            .flat_map(|&(_, i)| self.members[i].iter().copied())
            .collect()
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

/// An immutable, queryable view of the vector index at a point in time.
///
/// Readers hold an `Arc<Snapshot>` for the duration of a query; the writer
/// derives new snapshots with [`rebuild`](Snapshot::rebuild) and publishes
/// them through the [`RetrieverContext`](crate::context::RetrieverContext).
#[derive(Debug)]
pub struct Snapshot {
    /// Entries sorted by chunk id.
    entries: Vec<Arc<IndexEntry>>,
    clusters: Option<ClusterIndex>,
    version: u64,
}

impl Snapshot {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            entries: Vec::new(),
            clusters: None,
            version: 0,
        })
    }

    /// Build a snapshot from scratch (startup republish).
    pub fn build(mut entries: Vec<Arc<IndexEntry>>, exact_threshold: usize) -> Arc<Self> {
        entries.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        entries.dedup_by(|a, b| a.chunk_id == b.chunk_id);
        Arc::new(Self::assemble(entries, exact_threshold, 1))
    }

    /// Derive a new snapshot: previous entries minus `remove`, plus `add`.
    /// Unchanged entries keep their `Arc`s, so cost is proportional to the
    /// delta plus the final sort.
    pub fn rebuild(
        &self,
        remove: &HashSet<ChunkId>,
        add: Vec<Arc<IndexEntry>>,
        exact_threshold: usize,
    ) -> Arc<Snapshot> {
        let mut merged: HashMap<ChunkId, Arc<IndexEntry>> = self
            .entries
            .iter()
            .filter(|e| !remove.contains(&e.chunk_id))
            .map(|e| (e.chunk_id, Arc::clone(e)))
            .collect();
        for entry in add {
            merged.insert(entry.chunk_id, entry);
        }

        let mut entries: Vec<Arc<IndexEntry>> = merged.into_values().collect();
        entries.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        Arc::new(Self::assemble(entries, exact_threshold, self.version + 1))
    }

    fn assemble(entries: Vec<Arc<IndexEntry>>, exact_threshold: usize, version: u64) -> Self {
        let clusters = if entries.len() > exact_threshold {
            Some(ClusterIndex::build(&entries))
        } else {
            None
        };
        Self {
            entries,
            clusters,
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[Arc<IndexEntry>] {
        &self.entries
    }

    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.entries
            .binary_search_by(|e| e.chunk_id.cmp(chunk_id))
            .is_ok()
    }

    /// Chunk ids currently attributed to a document path.
    pub fn chunk_ids_for_path(&self, path: &str) -> Vec<ChunkId> {
        self.entries
            .iter()
            .filter(|e| e.path == path)
            .map(|e| e.chunk_id)
            .collect()
    }

    /// The dimension of the indexed vectors, if any entries exist.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.vector.len())
    }

    /// Top-`k` entries by cosine similarity to `query`.
    ///
    /// Returns exactly `min(k, len)` hits in descending score order, ties
    /// broken by ascending chunk id. A query whose dimension does not match
    /// the index returns no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        if self.dimension() != Some(query.len()) {
            return Vec::new();
        }

        let mut normalized = query.to_vec();
        normalize(&mut normalized);

        let wanted = k.min(self.entries.len());

        if let Some(clusters) = &self.clusters {
            let candidates = clusters.probe(&normalized);
            if candidates.len() >= wanted {
                let hits = self.rank(candidates.iter().map(|&i| i as usize), &normalized, k);
                if hits.len() == wanted {
                    return hits;
                }
            }
            // Not enough candidates in the probed clusters; fall through to
            // the exhaustive scan so the result-count contract holds.
        }

        self.rank(0..self.entries.len(), &normalized, k)
    }

    fn rank(
        &self,
        candidates: impl IntoIterator<Item = usize>,
        query: &[f32],
        k: usize,
    ) -> Vec<SearchHit> {
        let mut scored: Vec<(f32, usize)> = candidates
            .into_iter()
            .map(|idx| (dot(&self.entries[idx].vector, query), idx))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.entries[a.1].chunk_id.cmp(&self.entries[b.1].chunk_id))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, idx)| SearchHit {
                entry: Arc::clone(&self.entries[idx]),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id_byte: u8, path: &str, start: usize, vector: Vec<f32>) -> Arc<IndexEntry> {
        let mut vector = vector;
        normalize(&mut vector);
        Arc::new(IndexEntry {
            chunk_id: ChunkId::from_bytes([id_byte; 32]),
            path: path.to_string(),
            start,
            end: start + 10,
            text: format!("chunk {id_byte}"),
            text_hash: [id_byte; 32],
            vector,
        })
    }

    #[test]
    fn empty_snapshot_returns_no_hits() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.search(&[1.0, 0.0], 5).is_empty());
        assert_eq!(snapshot.len(), 0);
    }

    #[test]
    fn search_returns_min_k_entries_in_score_order() {
        let snapshot = Snapshot::build(
            vec![
                entry(1, "a.md", 0, vec![1.0, 0.0]),
                entry(2, "a.md", 10, vec![0.8, 0.2]),
                entry(3, "b.md", 0, vec![0.0, 1.0]),
            ],
            4096,
        );

        let hits = snapshot.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 3);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
        assert_eq!(hits[0].entry.chunk_id, ChunkId::from_bytes([1; 32]));

        let top2 = snapshot.search(&[1.0, 0.0], 2);
        assert_eq!(top2.len(), 2);
    }

    #[test]
    fn equal_scores_break_ties_by_ascending_chunk_id() {
        // Three identical vectors: scores are exactly equal.
        let snapshot = Snapshot::build(
            vec![
                entry(9, "a.md", 0, vec![1.0, 0.0]),
                entry(3, "a.md", 10, vec![1.0, 0.0]),
                entry(6, "a.md", 20, vec![1.0, 0.0]),
            ],
            4096,
        );

        let hits = snapshot.search(&[1.0, 0.0], 3);
        let ids: Vec<u8> = hits.iter().map(|h| h.entry.chunk_id.as_bytes()[0]).collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn rebuild_removes_and_adds_entries() {
        let snapshot = Snapshot::build(
            vec![
                entry(1, "a.md", 0, vec![1.0, 0.0]),
                entry(2, "a.md", 10, vec![0.5, 0.5]),
            ],
            4096,
        );

        let remove: HashSet<ChunkId> = [ChunkId::from_bytes([1; 32])].into_iter().collect();
        let next = snapshot.rebuild(&remove, vec![entry(7, "c.md", 0, vec![0.0, 1.0])], 4096);

        assert_eq!(next.len(), 2);
        assert!(!next.contains(&ChunkId::from_bytes([1; 32])));
        assert!(next.contains(&ChunkId::from_bytes([2; 32])));
        assert!(next.contains(&ChunkId::from_bytes([7; 32])));
        assert_eq!(next.version(), snapshot.version() + 1);
    }

    #[test]
    fn rebuild_shares_unchanged_entries_structurally() {
        let kept = entry(2, "a.md", 10, vec![0.5, 0.5]);
        let snapshot = Snapshot::build(
            vec![entry(1, "a.md", 0, vec![1.0, 0.0]), Arc::clone(&kept)],
            4096,
        );

        let remove: HashSet<ChunkId> = [ChunkId::from_bytes([1; 32])].into_iter().collect();
        let next = snapshot.rebuild(&remove, Vec::new(), 4096);

        let surviving = next
            .entries()
            .iter()
            .find(|e| e.chunk_id == ChunkId::from_bytes([2; 32]))
            .unwrap();
        assert!(Arc::ptr_eq(surviving, &kept));
    }

    #[test]
    fn rebuild_replaces_an_entry_with_the_same_id() {
        let snapshot = Snapshot::build(vec![entry(1, "a.md", 0, vec![1.0, 0.0])], 4096);
        let replacement = entry(1, "a.md", 0, vec![0.0, 1.0]);
        let next = snapshot.rebuild(&HashSet::new(), vec![Arc::clone(&replacement)], 4096);
        assert_eq!(next.len(), 1);
        assert!(Arc::ptr_eq(&next.entries()[0], &replacement));
    }

    #[test]
    fn chunk_ids_for_path_filters_by_document() {
        let snapshot = Snapshot::build(
            vec![
                entry(1, "a.md", 0, vec![1.0, 0.0]),
                entry(2, "b.md", 0, vec![0.5, 0.5]),
                entry(3, "a.md", 10, vec![0.0, 1.0]),
            ],
            4096,
        );
        let ids = snapshot.chunk_ids_for_path("a.md");
        assert_eq!(ids.len(), 2);
        assert!(snapshot.chunk_ids_for_path("missing.md").is_empty());
    }

    #[test]
    fn mismatched_query_dimension_yields_no_hits() {
        let snapshot = Snapshot::build(vec![entry(1, "a.md", 0, vec![1.0, 0.0])], 4096);
        assert!(snapshot.search(&[1.0, 0.0, 0.0], 1).is_empty());
    }

    /// Build a corpus of well-separated groups, each group sharing an axis.
    fn clustered_corpus(groups: usize, per_group: usize, dim: usize) -> Vec<Arc<IndexEntry>> {
        let mut entries = Vec::new();
        let mut id: u8 = 0;
        for g in 0..groups {
            for i in 0..per_group {
                let mut vector = vec![0.0f32; dim];
                vector[g] = 1.0;
                // Small deterministic off-axis component so members differ.
                vector[(g + 1) % dim] = 0.01 * (i as f32 + 1.0);
                entries.push(entry(id, &format!("doc{g}.md"), i * 10, vector));
                id = id.wrapping_add(1);
            }
        }
        entries
    }

    #[test]
    fn clustered_search_still_returns_exactly_min_k() {
        // Threshold of 10 forces the clustered path for 60 entries.
        let snapshot = Snapshot::build(clustered_corpus(6, 10, 8), 10);
        assert_eq!(snapshot.len(), 60);

        let mut query = vec![0.0f32; 8];
        query[2] = 1.0;
        let hits = snapshot.search(&query, 5);
        assert_eq!(hits.len(), 5);
        // All top hits come from the group aligned with the query axis.
        for hit in &hits {
            assert_eq!(hit.entry.path, "doc2.md");
        }

        // Asking for more than the corpus still returns the whole corpus.
        let all = snapshot.search(&query, 100);
        assert_eq!(all.len(), 60);
    }

    #[test]
    fn small_corpora_skip_clustering_entirely() {
        let snapshot = Snapshot::build(clustered_corpus(2, 3, 4), 4096);
        assert!(snapshot.clusters.is_none());
        let snapshot_clustered = Snapshot::build(clustered_corpus(2, 3, 4), 5);
        assert!(snapshot_clustered.clusters.is_some());
    }
}
