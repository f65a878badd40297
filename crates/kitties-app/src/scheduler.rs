//! # Pipeline Scheduler
//!
//! The single task that owns the [`Aggregator`] and the [`Publisher`].
//!
//! Each wake-up is a turn:
//! 1. Take one event (a control message, a subscription item or a stall tick)
//! 2. Apply every subscription event that is ready without waiting, optionally
//!    after a short batching window
//! 3. Reconcile once if anything changed
//! 4. Publish if the snapshot differs from the last one
//!
//! Control messages are handled with priority so a dispose is never stuck
//! behind a busy store.

use kitties_core::{RemoteStore, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::aggregator::{Aggregator, AggregatorEvent};
use crate::config::PipelineConfig;
use crate::publisher::{ListenerId, Publisher};
use crate::reconciler::reconcile;

/// Counters maintained by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Turns that applied at least one subscription event
    pub turns: u64,
    /// Subscription events applied
    pub events_applied: u64,
    /// Reconciler invocations
    pub reconciliations: u64,
    /// Snapshots delivered to listeners
    pub notifications: u64,
    /// Sessions started (first subscriber, resubscribe after idle, reset)
    pub sessions: u64,
}

/// Messages from the pipeline handle to the scheduler task.
pub enum Control {
    /// Register a snapshot listener
    Subscribe {
        /// Listener id
        id: ListenerId,
        /// Delivery channel
        tx: mpsc::UnboundedSender<Arc<Snapshot>>,
    },
    /// Remove a snapshot listener
    Unsubscribe(ListenerId),
    /// Drop the current session and start over on another store
    ResetSession(Arc<dyn RemoteStore>),
    /// Release everything and stop
    Dispose,
}

enum Wake {
    Control(Option<Control>),
    Event(AggregatorEvent),
    Stall(Instant),
}

/// Turn-based driver for one pipeline.
pub struct Scheduler {
    config: PipelineConfig,
    aggregator: Aggregator,
    publisher: Publisher,
    control_rx: mpsc::UnboundedReceiver<Control>,
    stall_ticker: Option<Interval>,
    session_active: bool,
    stats: Arc<RwLock<PipelineStats>>,
}

impl Scheduler {
    /// Create a scheduler and the sender used to control it.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RemoteStore>,
    ) -> (Self, mpsc::UnboundedSender<Control>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let publisher = Publisher::new(config.error_channel_capacity);
        let scheduler = Self {
            aggregator: Aggregator::new(store),
            publisher,
            control_rx,
            stall_ticker: None,
            session_active: false,
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            config,
        };
        (scheduler, control_tx)
    }

    /// Shared handle on the counters.
    pub fn stats(&self) -> Arc<RwLock<PipelineStats>> {
        Arc::clone(&self.stats)
    }

    /// The publisher, for wiring error and latest-snapshot receivers before
    /// the task starts.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Main loop. Returns after [`Control::Dispose`] or once every control
    /// sender is gone.
    pub async fn run(mut self) {
        tracing::info!(
            policy = ?self.config.snapshot_policy,
            batch_window = ?self.config.batch_window(),
            "kitties pipeline starting"
        );

        if let Some(timeout) = self.config.stall_timeout() {
            let period = (timeout / 4).max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.stall_ticker = Some(ticker);
        }

        loop {
            let wake = tokio::select! {
                biased;
                control = self.control_rx.recv() => Wake::Control(control),
                event = self.aggregator.next_event() => Wake::Event(event),
                now = next_tick(&mut self.stall_ticker), if self.stall_ticker.is_some() => {
                    Wake::Stall(now)
                }
            };

            match wake {
                Wake::Control(None | Some(Control::Dispose)) => break,
                Wake::Control(Some(control)) => self.handle_control(control).await,
                Wake::Event(event) => self.run_turn(event).await,
                Wake::Stall(now) => self.check_stalls(now),
            }
        }

        self.end_session();
        tracing::info!("kitties pipeline stopped");
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Subscribe { id, tx } => {
                if !self.session_active {
                    self.start_session().await;
                }
                self.publisher.register(id, tx);
                tracing::debug!(listener = id, "listener subscribed");
            }
            Control::Unsubscribe(id) => {
                if self.publisher.unregister(id) {
                    tracing::debug!(listener = id, "listener unsubscribed");
                }
                if self.publisher.listener_count() == 0 && self.config.release_when_idle {
                    self.end_session();
                }
            }
            Control::ResetSession(store) => {
                tracing::info!(active = self.session_active, "resetting session");
                if self.session_active {
                    self.aggregator.reset(store);
                    self.publisher.reset();
                    self.stats.write().await.sessions += 1;
                } else {
                    self.aggregator = Aggregator::new(store);
                }
            }
            // Handled by the main loop
            Control::Dispose => {}
        }
    }

    async fn start_session(&mut self) {
        self.aggregator.connect();
        self.publisher.reset();
        self.session_active = true;
        self.stats.write().await.sessions += 1;
        tracing::debug!("session started");
    }

    fn end_session(&mut self) {
        if !self.session_active {
            return;
        }
        let cancelled = self.aggregator.release();
        self.session_active = false;
        tracing::debug!(cancelled, "session released");
    }

    async fn run_turn(&mut self, first: AggregatorEvent) {
        let mut dirty = self.apply(first);
        let mut applied = 1;

        applied += self.drain_ready(applied, &mut dirty);

        let window = self.config.batch_window();
        if !window.is_zero() && applied < self.config.max_batch_size {
            tokio::time::sleep(window).await;
            applied += self.drain_ready(applied, &mut dirty);
        }

        self.finish_turn(applied, dirty).await;
    }

    /// Apply events that are ready now, up to the batch limit.
    fn drain_ready(&mut self, already: usize, dirty: &mut bool) -> usize {
        let max = self.config.max_batch_size;
        let mut applied = 0;
        while already + applied < max {
            let Some(event) = self.aggregator.try_next_event() else {
                return applied;
            };
            *dirty |= self.apply(event);
            applied += 1;
        }
        tracing::warn!(
            "Batch size {} exceeded max {}, forcing flush",
            already + applied,
            max
        );
        applied
    }

    fn apply(&mut self, event: AggregatorEvent) -> bool {
        let applied = self.aggregator.apply(event);
        if let Some(error) = applied.error {
            self.publisher.report(error);
        }
        applied.changed
    }

    async fn finish_turn(&mut self, applied: usize, dirty: bool) {
        let snapshot = dirty.then(|| {
            reconcile(
                self.aggregator.records(),
                self.aggregator.count(),
                self.config.snapshot_policy,
            )
        });
        let notifies = snapshot
            .as_ref()
            .is_some_and(|s| self.publisher.last().map(|last| last.as_ref()) != Some(s));

        {
            let mut stats = self.stats.write().await;
            stats.turns += 1;
            stats.events_applied += applied as u64;
            if snapshot.is_some() {
                stats.reconciliations += 1;
            }
            if notifies {
                stats.notifications += 1;
            }
        }

        tracing::trace!(applied, dirty, notifies, "turn finished");
        if let Some(snapshot) = snapshot {
            self.publisher.publish(snapshot);
        }
    }

    fn check_stalls(&mut self, now: Instant) {
        let Some(timeout) = self.config.stall_timeout() else {
            return;
        };
        for report in self.aggregator.take_stalled(now, timeout) {
            self.publisher.report(report);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
