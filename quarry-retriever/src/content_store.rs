//! Content store: per-document identity and change detection.
//!
//! The store keeps a manifest of path → (mtime, content hash) in the state
//! database and diffs it against a fresh walk of the watch roots. The mtime
//! is only a pre-filter: a file whose stored mtime matches is assumed
//! unchanged without rehashing, but whenever the mtime differs the blake3
//! hash of the file bytes is the source of truth, so coarse-mtime
//! filesystems cannot produce false "unchanged" verdicts.
//!
//! Unreadable files are skipped and reported in the diff; they never abort
//! a scan.

use crate::error::Result;
use ignore::WalkBuilder;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manifest row: the last observed state of one document.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub path: PathBuf,
    pub modified_at: i64,
    pub content_hash: [u8; 32],
}

/// A document read during a scan, content included.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified_at: i64,
    pub content_hash: [u8; 32],
    pub content: String,
}

impl ScannedFile {
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            path: self.path.clone(),
            modified_at: self.modified_at,
            content_hash: self.content_hash,
        }
    }
}

/// A file the scan could not read or stat.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Difference between the manifest and a fresh walk of the watch roots.
#[derive(Debug, Default)]
pub struct ScanDiff {
    /// Files not present in the manifest.
    pub added: Vec<ScannedFile>,
    /// Files whose content hash changed.
    pub changed: Vec<ScannedFile>,
    /// Manifest entries no longer found on disk.
    pub removed: Vec<PathBuf>,
    /// Files whose content is unchanged but whose mtime moved; the manifest
    /// is refreshed so the next scan skips rehashing them.
    pub touched: Vec<DocumentMeta>,
    /// Files skipped due to per-path IO errors.
    pub skipped: Vec<SkippedFile>,
}

impl ScanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Tracks per-document identity and produces scan diffs.
#[derive(Clone, Debug)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Walk the roots and diff against the manifest.
    ///
    /// `extension_filter` decides which paths count as documents (e.g.
    /// ".md"/".txt"). Per-path IO failures land in `ScanDiff::skipped`.
    pub async fn scan(
        &self,
        roots: &[PathBuf],
        extension_filter: impl Fn(&Path) -> bool,
    ) -> Result<ScanDiff> {
        let manifest = self.load_manifest().await?;
        let mut diff = ScanDiff::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        let candidates = walk_roots(roots, &extension_filter, &mut diff.skipped);

        for path in candidates {
            if !seen.insert(path.clone()) {
                continue;
            }

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    diff.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let modified_at = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let stored = manifest.get(&path);

            // mtime pre-filter: same mtime as the manifest means unchanged
            // without reading the file.
            if let Some(meta) = stored {
                if meta.modified_at == modified_at {
                    continue;
                }
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    diff.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let content_hash = *blake3::hash(&bytes).as_bytes();
            let content = String::from_utf8_lossy(&bytes).into_owned();

            let file = ScannedFile {
                path: path.clone(),
                modified_at,
                content_hash,
                content,
            };

            match stored {
                None => diff.added.push(file),
                Some(meta) if meta.content_hash != content_hash => diff.changed.push(file),
                Some(_) => diff.touched.push(file.meta()),
            }
        }

        for path in manifest.keys() {
            if !seen.contains(path) {
                diff.removed.push(path.clone());
            }
        }
        diff.removed.sort();

        debug!(
            "scan: {} added, {} changed, {} removed, {} touched, {} skipped",
            diff.added.len(),
            diff.changed.len(),
            diff.removed.len(),
            diff.touched.len(),
            diff.skipped.len()
        );
        Ok(diff)
    }

    async fn load_manifest(&self) -> Result<HashMap<PathBuf, DocumentMeta>> {
        let rows = sqlx::query("SELECT path, modified_at, content_hash FROM files")
            .fetch_all(&self.pool)
            .await?;

        let mut manifest = HashMap::with_capacity(rows.len());
        for row in rows {
            let path: String = row.get("path");
            let modified_at: i64 = row.get("modified_at");
            let hash_bytes: Vec<u8> = row.get("content_hash");
            if hash_bytes.len() != 32 {
                warn!("manifest entry for {path} has a malformed hash; treating as unknown");
                continue;
            }
            let mut content_hash = [0u8; 32];
            content_hash.copy_from_slice(&hash_bytes);
            let path = PathBuf::from(path);
            manifest.insert(
                path.clone(),
                DocumentMeta {
                    path,
                    modified_at,
                    content_hash,
                },
            );
        }
        Ok(manifest)
    }

    /// Record a document's observed state in the manifest.
    pub async fn record_document(&self, meta: &DocumentMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (path, modified_at, content_hash)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                modified_at = excluded.modified_at,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(meta.path.to_string_lossy().into_owned())
        .bind(meta.modified_at)
        .bind(&meta.content_hash[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop a document from the manifest.
    pub async fn remove_document(&self, path: &Path) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE path = ?1")
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of documents tracked in the manifest.
    pub async fn document_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

/// Walk the roots, collecting candidate document paths. Walk-level errors
/// (unreadable directories, broken links surfaced by the walker) are
/// recorded as skips.
fn walk_roots(
    roots: &[PathBuf],
    extension_filter: &impl Fn(&Path) -> bool,
    skipped: &mut Vec<SkippedFile>,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for root in roots {
        if !root.is_dir() {
            warn!("watch root {} is not a directory; skipping", root.display());
            continue;
        }
        for entry in WalkBuilder::new(root).build() {
            match entry {
                Ok(entry) => {
                    // Symlinks are candidates too; stat/read follows them
                    // and a dangling link becomes a per-path skip.
                    let is_candidate = entry
                        .file_type()
                        .map(|ft| ft.is_file() || ft.is_symlink())
                        .unwrap_or(false);
                    if is_candidate && extension_filter(entry.path()) {
                        candidates.push(entry.into_path());
                    }
                }
                Err(e) => {
                    skipped.push(SkippedFile {
                        path: root.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    candidates.sort();
    candidates
}
