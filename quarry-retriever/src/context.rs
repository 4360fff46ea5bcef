//! Shared retriever context: the published snapshot and the shutdown flag.
//!
//! This is the only state shared between the writer (the index manager)
//! and readers (query engines). The current snapshot lives in a
//! `tokio::sync::watch` channel: publishing is a single `send_replace` of
//! an `Arc<Snapshot>`, and a reader takes a clone of that `Arc` without
//! ever blocking the writer or other readers. A query keeps using the
//! snapshot it cloned even if a new one is published mid-flight.
//!
//! The context is created at startup, handed to the index manager and the
//! query engine at construction, and torn down after
//! [`request_shutdown`](RetrieverContext::request_shutdown) has stopped
//! any in-flight sync.

use crate::status::SyncReport;
use crate::vector_index::Snapshot;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

pub struct RetrieverContext {
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    shutdown_tx: watch::Sender<bool>,
    last_report: RwLock<Option<SyncReport>>,
}

impl RetrieverContext {
    /// Fresh context holding an empty snapshot.
    pub fn new() -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(Snapshot::empty());
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            snapshot_tx,
            shutdown_tx,
            last_report: RwLock::new(None),
        })
    }

    /// The currently published snapshot. Cheap: clones an `Arc`.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Atomically publish a new snapshot. Readers holding the previous one
    /// are unaffected.
    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Subscribe to snapshot publications (used by tests and status UIs to
    /// wait for a cycle to land).
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Ask the sync loop to stop. In-flight queries complete against the
    /// snapshot they already hold.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn set_report(&self, report: SyncReport) {
        *self.last_report.write().unwrap() = Some(report);
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().unwrap().clone()
    }
}
