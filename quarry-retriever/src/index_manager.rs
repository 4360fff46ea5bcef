//! Index manager: the single writer that keeps the snapshot in sync with
//! the filesystem.
//!
//! ## Cycle
//!
//! ```text
//! Idle → Scanning → Rebuilding → Publishing → Idle
//!          |            |
//!          +-- shutdown-+--→ Idle (nothing published)
//! ```
//!
//! Each cycle diffs the watch roots against the manifest, drops every chunk
//! attributed to changed or removed documents, re-chunks added and changed
//! documents, fetches vectors through the embedding cache (provider calls
//! only on cache misses), derives a new snapshot sharing unchanged entries
//! with the previous one, persists the delta, and publishes the snapshot
//! with a single atomic swap.
//!
//! ## Failure policy
//!
//! A chunk whose embedding fails after retries is skipped and counted; the
//! cycle still publishes everything that succeeded. The owning document is
//! not committed to the manifest, so the next cycle re-processes it — the
//! successful chunks hit the cache and only the failed one reaches the
//! provider again. A cycle interrupted by shutdown publishes nothing and
//! leaves the previous snapshot intact.

use crate::config::RetrieverConfig;
use crate::content_store::{ContentStore, DocumentMeta, ScanDiff, ScannedFile};
use crate::context::RetrieverContext;
use crate::embedding_cache::{CacheOutcome, EmbeddingCache};
use crate::error::{Result, RetrieverError};
use crate::status::{IndexStatus, SyncReport};
use crate::storage::StateDb;
use crate::vector_index::{IndexEntry, Snapshot};
use quarry_context::{Chunker, ChunkId};
use quarry_embed::{EmbeddingProvider, RetryPolicy};
use sqlx::Row;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Phase of the sync state machine, observable for status and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SyncPhase {
    Idle,
    Scanning,
    Rebuilding,
    Publishing,
}

/// The single writer maintaining the vector index.
pub struct IndexManager {
    config: RetrieverConfig,
    chunker: Chunker,
    db: StateDb,
    content_store: ContentStore,
    cache: EmbeddingCache,
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    context: Arc<RetrieverContext>,
    phase_tx: watch::Sender<SyncPhase>,
    /// Serializes sync cycles: the periodic loop and on-demand callers may
    /// both request one, but there is only ever one writer.
    sync_lock: tokio::sync::Mutex<()>,
}

impl IndexManager {
    /// Open the state database under the configured state dir, republish
    /// the persisted snapshot, and return a manager ready to sync.
    pub async fn new(
        config: RetrieverConfig,
        provider: Arc<dyn EmbeddingProvider>,
        context: Arc<RetrieverContext>,
    ) -> Result<Self> {
        config.validate()?;
        let db = StateDb::open(&config.state_dir()).await?;
        Self::with_db(config, provider, context, db).await
    }

    /// Manager backed by an in-memory database, for tests.
    pub async fn new_memory(
        config: RetrieverConfig,
        provider: Arc<dyn EmbeddingProvider>,
        context: Arc<RetrieverContext>,
    ) -> Result<Self> {
        config.validate()?;
        let db = StateDb::open_memory().await?;
        Self::with_db(config, provider, context, db).await
    }

    async fn with_db(
        config: RetrieverConfig,
        provider: Arc<dyn EmbeddingProvider>,
        context: Arc<RetrieverContext>,
        db: StateDb,
    ) -> Result<Self> {
        let manager = Self {
            chunker: Chunker::new(config.chunker_config()),
            content_store: ContentStore::new(db.pool().clone()),
            cache: EmbeddingCache::new(db.pool().clone()),
            retry: config.retry_policy(),
            phase_tx: watch::channel(SyncPhase::Idle).0,
            sync_lock: tokio::sync::Mutex::new(()),
            config,
            db,
            provider,
            context,
        };

        // Republish whatever the last process left behind so queries work
        // before the first sync cycle of this process completes.
        match manager.load_persisted().await {
            Ok(entries) if !entries.is_empty() => {
                let snapshot = Snapshot::build(entries, manager.config.exact_search_threshold);
                info!("republished persisted snapshot with {} entries", snapshot.len());
                manager.context.publish(snapshot);
            }
            Ok(_) => {}
            Err(RetrieverError::CorruptState { what, detail }) => {
                warn!("persisted {what} is corrupt ({detail}); rebuilding from scratch");
                manager.db.reset_index_state().await?;
            }
            Err(e) => return Err(e),
        }

        Ok(manager)
    }

    /// Load persisted index entries by joining chunks with their cached
    /// vectors. Rows whose embedding is missing are dropped (the next sync
    /// re-embeds them); malformed rows mean corrupt state.
    async fn load_persisted(&self) -> Result<Vec<Arc<IndexEntry>>> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.path, c.start_offset, c.end_offset,
                   c.text_hash, c.content, e.dimension, e.vector
            FROM chunks c
            JOIN embeddings e ON e.text_hash = c.text_hash AND e.stale = 0
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id: Vec<u8> = row.get("chunk_id");
            let text_hash: Vec<u8> = row.get("text_hash");
            let dimension: i64 = row.get("dimension");
            let blob: Vec<u8> = row.get("vector");

            let chunk_id: [u8; 32] = chunk_id
                .try_into()
                .map_err(|_| RetrieverError::corrupt("index entries", "bad chunk id length"))?;
            let text_hash: [u8; 32] = text_hash
                .try_into()
                .map_err(|_| RetrieverError::corrupt("index entries", "bad text hash length"))?;
            if blob.len() != dimension as usize * 2 {
                return Err(RetrieverError::corrupt(
                    "embedding cache",
                    "vector blob does not match its dimension",
                ));
            }

            let halves: Vec<half::f16> = bytemuck::pod_collect_to_vec(&blob);
            let vector: Vec<f32> = halves.into_iter().map(f32::from).collect();

            let start: i64 = row.get("start_offset");
            let end: i64 = row.get("end_offset");
            entries.push(Arc::new(IndexEntry {
                chunk_id: ChunkId::from_bytes(chunk_id),
                path: row.get("path"),
                start: start as usize,
                end: end as usize,
                text: row.get("content"),
                text_hash,
                vector,
            }));
        }
        Ok(entries)
    }

    /// Run one full sync cycle. Returns the report; `cancelled` is set when
    /// a shutdown signal interrupted the cycle before publishing.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let _writer = self.sync_lock.lock().await;
        let mut report = SyncReport::begin();

        self.set_phase(SyncPhase::Scanning);
        let diff = self
            .content_store
            .scan(&self.config.watch_roots, |path| {
                self.config.matches_extension(path)
            })
            .await?;

        report.files_added = diff.added.len();
        report.files_changed = diff.changed.len();
        report.files_removed = diff.removed.len();
        report.files_skipped = diff.skipped.len();
        for skipped in &diff.skipped {
            warn!("skipping unreadable file {}: {}", skipped.path.display(), skipped.reason);
        }

        if self.cancelled(&mut report) {
            self.set_phase(SyncPhase::Idle);
            return Ok(report);
        }

        self.set_phase(SyncPhase::Rebuilding);
        let previous = self.context.current_snapshot();

        // Every chunk currently attributed to a touched or vanished path is
        // stale; replacements are inserted below.
        let mut stale_paths: HashSet<String> = HashSet::new();
        for file in diff.added.iter().chain(diff.changed.iter()) {
            stale_paths.insert(file.path.to_string_lossy().into_owned());
        }
        for path in &diff.removed {
            stale_paths.insert(path.to_string_lossy().into_owned());
        }

        let mut stale_ids: HashSet<ChunkId> = HashSet::new();
        for path in &stale_paths {
            stale_ids.extend(previous.chunk_ids_for_path(path));
        }
        report.chunks_removed = stale_ids.len();

        let mut new_entries: Vec<Arc<IndexEntry>> = Vec::new();
        let mut complete_docs: Vec<DocumentMeta> = Vec::new();

        for file in diff.added.iter().chain(diff.changed.iter()) {
            if self.cancelled(&mut report) {
                self.set_phase(SyncPhase::Idle);
                return Ok(report);
            }
            let failed = self
                .process_document(file, &mut new_entries, &mut report)
                .await?;
            if failed == 0 {
                complete_docs.push(file.meta());
            } else {
                debug!(
                    "{}: {failed} chunk(s) failed to embed; document left uncommitted for retry",
                    file.path.display()
                );
            }
        }

        if self.cancelled(&mut report) {
            self.set_phase(SyncPhase::Idle);
            return Ok(report);
        }

        self.set_phase(SyncPhase::Publishing);
        let next = previous.rebuild(
            &stale_ids,
            new_entries.clone(),
            self.config.exact_search_threshold,
        );

        self.persist(&diff, &stale_paths, &new_entries, &complete_docs)
            .await?;
        self.context.publish(next);

        report.finish();
        info!("sync cycle complete: {}", report.summary());
        self.context.set_report(report.clone());
        self.set_phase(SyncPhase::Idle);
        Ok(report)
    }

    /// Chunk one document and resolve vectors through the cache. Returns
    /// the number of chunks that failed to embed.
    async fn process_document(
        &self,
        file: &ScannedFile,
        new_entries: &mut Vec<Arc<IndexEntry>>,
        report: &mut SyncReport,
    ) -> Result<usize> {
        let path = file.path.to_string_lossy().into_owned();
        let chunks = self.chunker.chunk(&path, &file.content);
        debug!("{path}: {} chunk(s)", chunks.len());

        let mut failed = 0usize;
        for chunk in &chunks {
            match self
                .cache
                .get_or_compute(chunk, self.provider.as_ref(), &self.retry)
                .await
            {
                Ok((vector, outcome)) => {
                    match outcome {
                        CacheOutcome::Hit => report.cache_hits += 1,
                        CacheOutcome::Computed => report.cache_misses += 1,
                    }
                    new_entries.push(IndexEntry::from_chunk(chunk, vector));
                    report.chunks_indexed += 1;
                }
                Err(RetrieverError::Embedding(e)) => {
                    warn!("failed to embed chunk {} of {path}: {e}", chunk.id);
                    failed += 1;
                    report.chunks_failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    /// Persist the cycle's delta: replace chunk rows for touched paths,
    /// commit fully-processed documents to the manifest, drop removed ones.
    /// Vectors were already persisted by the cache as they were computed.
    async fn persist(
        &self,
        diff: &ScanDiff,
        stale_paths: &HashSet<String>,
        new_entries: &[Arc<IndexEntry>],
        complete_docs: &[DocumentMeta],
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        for path in stale_paths {
            sqlx::query("DELETE FROM chunks WHERE path = ?1")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        for entry in new_entries {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, path, start_offset, end_offset, text_hash, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    path = excluded.path,
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset,
                    text_hash = excluded.text_hash,
                    content = excluded.content
                "#,
            )
            .bind(&entry.chunk_id.as_bytes()[..])
            .bind(&entry.path)
            .bind(entry.start as i64)
            .bind(entry.end as i64)
            .bind(&entry.text_hash[..])
            .bind(&entry.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        for meta in complete_docs {
            self.content_store.record_document(meta).await?;
        }
        for meta in &diff.touched {
            self.content_store.record_document(meta).await?;
        }
        for path in &diff.removed {
            self.content_store.remove_document(path).await?;
        }

        Ok(())
    }

    /// Run sync cycles on the configured cadence until shutdown. The first
    /// cycle starts immediately.
    pub async fn run(&self) {
        let mut shutdown = self.context.shutdown_signal();
        let mut ticker = tokio::time::interval(self.config.sync_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "index manager running: {} root(s), every {:?}",
            self.config.watch_roots.len(),
            self.config.sync_interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sync_once().await {
                        Ok(report) if report.cancelled => break,
                        Ok(_) => {}
                        Err(e) => error!("sync cycle failed: {e}"),
                    }
                    if self.context.is_shutdown() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if self.context.is_shutdown() {
                        break;
                    }
                }
            }
        }

        info!("index manager stopped");
    }

    fn cancelled(&self, report: &mut SyncReport) -> bool {
        if self.context.is_shutdown() {
            report.cancelled = true;
            report.finish();
            info!("sync cycle cancelled by shutdown");
            true
        } else {
            false
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Current phase of the sync state machine.
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    pub fn context(&self) -> &Arc<RetrieverContext> {
        &self.context
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Status of the stored index plus the last cycle report.
    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus {
            documents: self.content_store.document_count().await?,
            chunks: self.context.current_snapshot().len(),
            embeddings_cached: self.cache.len().await?,
            last_report: self.context.last_report(),
        })
    }

    /// Maintenance: prune cached vectors no longer referenced by the
    /// current snapshot.
    pub async fn compact_cache(&self) -> Result<usize> {
        let live: HashSet<[u8; 32]> = self
            .context
            .current_snapshot()
            .entries()
            .iter()
            .map(|e| e.text_hash)
            .collect();
        self.cache.compact(&live).await
    }

    /// Paths currently attributed to documents in the snapshot (test and
    /// status helper).
    pub fn indexed_paths(&self) -> Vec<PathBuf> {
        let snapshot = self.context.current_snapshot();
        let mut paths: Vec<PathBuf> = snapshot
            .entries()
            .iter()
            .map(|e| PathBuf::from(&e.path))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}
