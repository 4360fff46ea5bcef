//! Sync cycle reports and index status.
//!
//! Degradation is visible, never blocking: a cycle that skipped files or
//! failed to embed some chunks still publishes, and the caller reads the
//! damage from the last [`SyncReport`] instead of losing search.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Files newly observed this cycle.
    pub files_added: usize,
    /// Files whose content hash changed.
    pub files_changed: usize,
    /// Files that disappeared from the watch roots.
    pub files_removed: usize,
    /// Files skipped because they could not be read or stat'd.
    pub files_skipped: usize,
    /// Chunks written into the published snapshot this cycle.
    pub chunks_indexed: usize,
    /// Stale chunks dropped from the snapshot this cycle.
    pub chunks_removed: usize,
    /// Chunks whose embedding failed after retries; retried next cycle.
    pub chunks_failed: usize,
    /// Vectors served from the embedding cache.
    pub cache_hits: usize,
    /// Vectors computed by the embedding provider.
    pub cache_misses: usize,
    /// Whether the cycle stopped early on a shutdown signal.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn begin() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when this cycle left some content out of the index.
    pub fn is_degraded(&self) -> bool {
        self.chunks_failed > 0 || self.files_skipped > 0
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "files +{}/~{}/-{} (skipped {}), chunks +{}/-{} (failed {}), cache {}/{} hit{}",
            self.files_added,
            self.files_changed,
            self.files_removed,
            self.files_skipped,
            self.chunks_indexed,
            self.chunks_removed,
            self.chunks_failed,
            self.cache_hits,
            self.cache_hits + self.cache_misses,
            if self.cancelled { " (cancelled)" } else { "" },
        )
    }
}

/// Point-in-time view of the stored index, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Documents tracked in the manifest.
    pub documents: usize,
    /// Entries in the current snapshot.
    pub chunks: usize,
    /// Distinct vectors in the embedding cache.
    pub embeddings_cached: usize,
    /// Report from the most recent sync cycle, if any ran.
    pub last_report: Option<SyncReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degradation_reflects_failures_and_skips() {
        let mut report = SyncReport::default();
        assert!(!report.is_degraded());
        report.chunks_failed = 1;
        assert!(report.is_degraded());

        let mut skipped = SyncReport::default();
        skipped.files_skipped = 2;
        assert!(skipped.is_degraded());
    }

    #[test]
    fn summary_mentions_cancellation() {
        let mut report = SyncReport::default();
        report.cancelled = true;
        assert!(report.summary().contains("cancelled"));
    }
}
