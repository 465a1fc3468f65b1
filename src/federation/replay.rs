//! Replay of unprocessed objects
//!
//! Objects are persisted before dispatch, so anything stored but missing
//! from the processed ledger was interrupted. At startup a scanner task
//! streams those objects (Follows first, then Undos) over a bounded
//! channel; a single marker task appends to the processed ledger. A
//! counter of in-flight objects tells the caller when everything sent has
//! been marked or abandoned.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use super::inbox::InboxProcessor;
use crate::data::{FederatedObject, ObjectStore, ProcessedLedger};
use crate::metrics::REPLAYED_OBJECTS_TOTAL;

/// Replayed types, in dispatch order
const REPLAY_ORDER: [&str; 2] = ["Follow", "Undo"];

const DEFAULT_CAPACITY: usize = 16;

/// Counter of outstanding work with an async wait for zero
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Default)]
struct WaitGroupInner {
    count: AtomicUsize,
    zero: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::SeqCst);
    }

    /// Decrement the counter; a call at zero is ignored.
    pub fn done(&self) {
        let previous = self
            .inner
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.inner.zero.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("WaitGroup::done called with nothing outstanding"),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until the counter reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

enum Mark {
    /// Sent by the scanner before the object goes out
    Queued(String),
    Processed(String),
    Abandoned(String),
}

/// Handle for reporting the fate of scanned objects
#[derive(Clone)]
pub struct Marker {
    tx: mpsc::UnboundedSender<Mark>,
}

impl Marker {
    /// Record `id` in the processed ledger.
    ///
    /// Only the first mark or abandon for a scanned id takes effect; ids
    /// this scan never queued are ignored.
    pub fn mark_processed(&self, id: &str) {
        if self.tx.send(Mark::Processed(id.to_string())).is_err() {
            tracing::warn!(id = %id, "Marker task gone, processed mark dropped");
        }
    }

    /// Give up on `id`; it stays unprocessed for the next scan.
    pub fn abandon(&self, id: &str) {
        if self.tx.send(Mark::Abandoned(id.to_string())).is_err() {
            tracing::warn!(id = %id, "Marker task gone, abandon dropped");
        }
    }
}

/// A running scan
///
/// Every object received from [`Scan::next`] must be passed to
/// [`Marker::mark_processed`] or [`Marker::abandon`], otherwise
/// [`Scan::wait`] never returns.
pub struct Scan {
    rx: mpsc::Receiver<FederatedObject>,
    marker: Marker,
    pending: WaitGroup,
    scanner: JoinHandle<()>,
}

impl Scan {
    pub async fn next(&mut self) -> Option<FederatedObject> {
        self.rx.recv().await
    }

    pub fn marker(&self) -> Marker {
        self.marker.clone()
    }

    /// Wait until the scan has finished and every object was marked or abandoned.
    pub async fn wait(&self) {
        self.pending.wait().await;
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        self.scanner.abort();
    }
}

/// Start scanning for stored objects that were never marked processed.
pub fn scan_unprocessed(
    objects: Arc<ObjectStore>,
    processed: Arc<ProcessedLedger>,
    capacity: usize,
) -> Scan {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (mark_tx, mark_rx) = mpsc::unbounded_channel();
    let pending = WaitGroup::new();

    // Held by the scanner until it has sent everything
    pending.add(1);

    let scanner = tokio::spawn(run_scanner(
        objects,
        processed.clone(),
        tx,
        mark_tx.clone(),
        pending.clone(),
    ));
    tokio::spawn(run_marker(processed, mark_rx, pending.clone()));

    Scan {
        rx,
        marker: Marker { tx: mark_tx },
        pending,
        scanner,
    }
}

async fn run_scanner(
    objects: Arc<ObjectStore>,
    processed: Arc<ProcessedLedger>,
    tx: mpsc::Sender<FederatedObject>,
    queued: mpsc::UnboundedSender<Mark>,
    pending: WaitGroup,
) {
    let done = match processed.ids().await {
        Ok(ids) => ids,
        Err(error) => {
            tracing::error!(%error, "Cannot read processed ledger, skipping replay");
            pending.done();
            return;
        }
    };

    let mut seen = HashSet::new();
    'scan: for kind in REPLAY_ORDER {
        let ids = match objects.ids_of_type(kind).await {
            Ok(ids) => ids,
            Err(error) => {
                tracing::error!(kind = %kind, %error, "Cannot list stored objects");
                continue;
            }
        };

        for id in ids {
            if done.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            let object = match objects.get(&id).await {
                Ok(object) => object,
                Err(error) => {
                    tracing::warn!(id = %id, %error, "Skipping unreadable object");
                    continue;
                }
            };

            pending.add(1);
            if queued.send(Mark::Queued(id.clone())).is_err() {
                pending.done();
                break 'scan;
            }
            if tx.send(object).await.is_err() {
                pending.done();
                break 'scan;
            }
        }
    }

    tracing::debug!(queued = seen.len(), "Replay scan finished");
    pending.done();
}

async fn run_marker(
    processed: Arc<ProcessedLedger>,
    mut rx: mpsc::UnboundedReceiver<Mark>,
    pending: WaitGroup,
) {
    // Ids sent out and not yet settled; a mark for anything else is ignored
    let mut outstanding = HashSet::new();
    while let Some(mark) = rx.recv().await {
        let (id, completed) = match mark {
            Mark::Queued(id) => {
                outstanding.insert(id);
                continue;
            }
            Mark::Processed(id) => (id, true),
            Mark::Abandoned(id) => (id, false),
        };
        if !outstanding.remove(&id) {
            tracing::debug!(id = %id, "Ignoring mark for an id that is not outstanding");
            continue;
        }

        if completed {
            if let Err(error) = processed.mark(&id).await {
                tracing::error!(id = %id, %error, "Failed to mark object processed");
            }
        } else {
            tracing::debug!(id = %id, "Replay abandoned object");
        }
        pending.done();
    }
}

/// Counts from one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub failed: usize,
}

/// Dispatch every stored but unprocessed Follow and Undo, in order.
pub async fn replay_unprocessed(
    processor: &InboxProcessor,
    objects: Arc<ObjectStore>,
    processed: Arc<ProcessedLedger>,
) -> ReplaySummary {
    let mut scan = scan_unprocessed(objects, processed, DEFAULT_CAPACITY);
    let marker = scan.marker();
    let mut summary = ReplaySummary::default();

    while let Some(object) = scan.next().await {
        match processor.dispatch(&object).await {
            Ok(outcome) => {
                tracing::info!(id = %object.id, ?outcome, "Replayed object");
                marker.mark_processed(&object.id);
                REPLAYED_OBJECTS_TOTAL.with_label_values(&["success"]).inc();
                summary.replayed += 1;
            }
            Err(error) => {
                tracing::warn!(id = %object.id, %error, "Replay failed");
                marker.abandon(&object.id);
                REPLAYED_OBJECTS_TOTAL.with_label_values(&["failure"]).inc();
                summary.failed += 1;
            }
        }
    }
    scan.wait().await;

    tracing::info!(
        replayed = summary.replayed,
        failed = summary.failed,
        "Replay of unprocessed objects complete"
    );
    summary
}
