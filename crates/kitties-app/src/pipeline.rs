//! # Kitties Pipeline
//!
//! Handle around the running [`Scheduler`] task. Everything the UI touches
//! goes through here:
//! - `subscribe()` for the snapshot stream
//! - `subscribe_errors()` for the error channel
//! - `latest()` for a one-off read
//! - `reset_session()` / `dispose()` for lifecycle

use kitties_core::{KittiesError, KittiesResult, RemoteStore, Snapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::publisher::ListenerId;
use crate::scheduler::{Control, PipelineStats, Scheduler};

/// Owns the running pipeline task.
pub struct KittiesPipeline {
    control_tx: mpsc::UnboundedSender<Control>,
    errors: broadcast::Receiver<KittiesError>,
    latest: watch::Receiver<Option<Arc<Snapshot>>>,
    stats: Arc<RwLock<PipelineStats>>,
    next_listener: AtomicU64,
    task: Option<JoinHandle<()>>,
}

impl KittiesPipeline {
    /// Validate `config` and spawn the pipeline task on the current runtime.
    ///
    /// No remote subscription is made until the first [`subscribe`](Self::subscribe).
    pub fn start(store: Arc<dyn RemoteStore>, config: PipelineConfig) -> KittiesResult<Self> {
        config.validate()?;

        let (scheduler, control_tx) = Scheduler::new(config, store);
        let errors = scheduler.publisher().subscribe_errors();
        let latest = scheduler.publisher().watch_latest();
        let stats = scheduler.stats();
        let task = tokio::spawn(scheduler.run());

        Ok(Self {
            control_tx,
            errors,
            latest,
            stats,
            next_listener: AtomicU64::new(1),
            task: Some(task),
        })
    }

    /// Register a snapshot listener.
    ///
    /// The first listener starts a session. Dropping the returned subscription
    /// unregisters it.
    pub fn subscribe(&self) -> KittiesResult<SnapshotSubscription> {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Control::Subscribe { id, tx })?;
        Ok(SnapshotSubscription {
            id,
            rx,
            control_tx: self.control_tx.clone(),
        })
    }

    /// Receiver for pipeline errors reported from now on.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<KittiesError> {
        self.errors.resubscribe()
    }

    /// Last published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.borrow().clone()
    }

    /// Receiver that tracks the last published snapshot.
    pub fn watch_latest(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.latest.clone()
    }

    /// Current counters.
    pub async fn stats(&self) -> PipelineStats {
        self.stats.read().await.clone()
    }

    /// Cancel every subscription of the current session, discard its data and
    /// continue against `store`.
    pub fn reset_session(&self, store: Arc<dyn RemoteStore>) -> KittiesResult<()> {
        self.send(Control::ResetSession(store))
    }

    /// Release every subscription and wait for the task to stop.
    pub async fn dispose(mut self) {
        let _ = self.control_tx.send(Control::Dispose);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::error!(%error, "kitties pipeline task failed");
            }
        }
    }

    fn send(&self, control: Control) -> KittiesResult<()> {
        self.control_tx
            .send(control)
            .map_err(|_| KittiesError::PipelineClosed)
    }
}

impl Drop for KittiesPipeline {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Dispose);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A registered snapshot listener.
pub struct SnapshotSubscription {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<Arc<Snapshot>>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl SnapshotSubscription {
    /// Listener id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next snapshot. `None` once the pipeline has stopped.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }

    /// Take a snapshot that is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Unsubscribe(self.id));
    }
}
