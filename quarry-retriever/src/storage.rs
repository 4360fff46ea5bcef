//! SQLite state database for the retriever.
//!
//! One database file (`.quarry.db`) holds the three independently
//! reloadable stores:
//!
//! ```sql
//! -- Manifest: last observed state per document
//! CREATE TABLE files (
//!     path TEXT PRIMARY KEY,           -- absolute document path
//!     modified_at INTEGER,             -- mtime, unix seconds
//!     content_hash BLOB                -- blake3 of the file bytes (32 bytes)
//! );
//!
//! -- Embedding cache: one vector per distinct chunk text
//! CREATE TABLE embeddings (
//!     text_hash BLOB PRIMARY KEY,      -- blake3 of the chunk text
//!     dimension INTEGER,               -- vector length
//!     vector BLOB,                     -- f16 values
//!     stale INTEGER DEFAULT 0
//! );
//!
//! -- Index entries: the chunks of the last published snapshot
//! CREATE TABLE chunks (
//!     chunk_id BLOB PRIMARY KEY,       -- identity over (path, offsets, text)
//!     path TEXT,
//!     start_offset INTEGER,
//!     end_offset INTEGER,
//!     text_hash BLOB,                  -- joins against embeddings
//!     content TEXT
//! );
//! ```
//!
//! A database that cannot be opened is moved aside and recreated empty —
//! the retriever rebuilds from the filesystem rather than crashing on
//! corrupt state.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::warn;

pub const DB_FILE_NAME: &str = ".quarry.db";

/// Handle to the state database; cheap to clone.
#[derive(Clone, Debug)]
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open (or create) the state database under `state_dir`.
    ///
    /// An unreadable database file is discarded and recreated; the caller
    /// then observes empty stores and performs a full rebuild.
    pub async fn open(state_dir: &Path) -> Result<Self> {
        let db_path = state_dir.join(DB_FILE_NAME);

        match Self::connect(&db_path).await {
            Ok(db) => Ok(db),
            Err(first_err) => {
                warn!(
                    "state database at {} is unusable ({first_err}); discarding and rebuilding",
                    db_path.display()
                );
                // Remove the main file and SQLite's sidecar files.
                let _ = std::fs::remove_file(&db_path);
                let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
                let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
                Self::connect(&db_path).await
            }
        }
    }

    async fn connect(db_path: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same in-memory store.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                modified_at INTEGER NOT NULL,
                content_hash BLOB NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                text_hash BLOB PRIMARY KEY,
                dimension INTEGER NOT NULL,
                vector BLOB NOT NULL,
                stale INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id BLOB PRIMARY KEY,
                path TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                text_hash BLOB NOT NULL,
                content TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Discard the persisted index entries and embedding cache, keeping the
    /// manifest untouched. Used when a corrupt store is detected at load.
    pub async fn reset_index_state(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        sqlx::query("DELETE FROM embeddings")
            .execute(&self.pool)
            .await?;
        // With the caches gone the manifest would claim files are current
        // while the index has no entries for them; clear it so the next
        // scan reports everything as added.
        sqlx::query("DELETE FROM files").execute(&self.pool).await?;
        Ok(())
    }
}
