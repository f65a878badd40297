//! Snapshot fan-out to listeners.
//!
//! The publisher remembers the last snapshot it delivered and only fans out a
//! new one when it differs by value. Errors travel on a separate broadcast
//! channel and never touch the snapshot stream.

use kitties_core::{KittiesError, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Identifier of a registered snapshot listener.
pub type ListenerId = u64;

/// Delivers snapshots and errors to registered listeners.
pub struct Publisher {
    last: Option<Arc<Snapshot>>,
    listeners: BTreeMap<ListenerId, mpsc::UnboundedSender<Arc<Snapshot>>>,
    errors: broadcast::Sender<KittiesError>,
    latest: watch::Sender<Option<Arc<Snapshot>>>,
}

impl Publisher {
    /// Create a publisher whose error channel buffers `error_capacity` entries
    /// per subscriber.
    pub fn new(error_capacity: usize) -> Self {
        let (errors, _) = broadcast::channel(error_capacity);
        let (latest, _) = watch::channel(None);
        Self {
            last: None,
            listeners: BTreeMap::new(),
            errors,
            latest,
        }
    }

    /// Deliver `snapshot` if it differs from the last one delivered.
    ///
    /// Returns `true` if listeners were notified.
    pub fn publish(&mut self, snapshot: Snapshot) -> bool {
        if self.last.as_deref() == Some(&snapshot) {
            tracing::trace!("snapshot unchanged, not notifying");
            return false;
        }

        let snapshot = Arc::new(snapshot);
        self.last = Some(Arc::clone(&snapshot));
        self.latest.send_replace(Some(Arc::clone(&snapshot)));

        // Listeners whose receiver is gone are pruned here; their unsubscribe
        // message may still be queued.
        self.listeners
            .retain(|_, tx| tx.send(Arc::clone(&snapshot)).is_ok());

        tracing::debug!(
            entries = snapshot.len(),
            listeners = self.listeners.len(),
            "published snapshot"
        );
        true
    }

    /// Register a listener. It immediately receives the current snapshot, if
    /// one has been published.
    pub fn register(&mut self, id: ListenerId, tx: mpsc::UnboundedSender<Arc<Snapshot>>) {
        if let Some(current) = &self.last {
            if tx.send(Arc::clone(current)).is_err() {
                return;
            }
        }
        self.listeners.insert(id, tx);
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Report a condition on the error channel.
    pub fn report(&self, error: KittiesError) {
        tracing::warn!(%error, severity = ?error.severity(), "pipeline error");
        // No error subscriber is not a failure.
        let _ = self.errors.send(error);
    }

    /// Forget the last snapshot so the next publish always notifies.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Last snapshot delivered in this session.
    pub fn last(&self) -> Option<&Arc<Snapshot>> {
        self.last.as_ref()
    }

    /// New receiver on the error channel.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<KittiesError> {
        self.errors.subscribe()
    }

    /// New receiver tracking the most recent snapshot.
    pub fn watch_latest(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.latest.subscribe()
    }
}
