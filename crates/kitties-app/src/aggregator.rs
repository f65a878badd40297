//! # Aggregator
//!
//! Owns the remote subscriptions of one session and the accumulating map they
//! feed.
//!
//! ## Subscriptions
//!
//! - One count subscription per session.
//! - One owner lookup and one DNA lookup per index below the accepted count,
//!   held in a [`StreamMap`] keyed by [`LookupKey`]. Removing a key drops the
//!   stream, which is how a lookup is cancelled. An index is subscribed at most
//!   once per session.
//!
//! ## Count handling
//!
//! The accepted count doubles as the high-water mark: growth issues lookups for
//! the new indices, a regression cancels and trims everything at or beyond the
//! new count, equal values are ignored.
//!
//! The aggregator never reconciles. It reports whether the map changed and the
//! scheduler decides when to run the reconciler.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use kitties_core::{
    Field, KittiesError, KittyCount, KittyDna, KittyIndex, OwnerId, PartialKitties, RemoteStore,
    StoreError, StoreStream, SubscriptionSource,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::StreamMap;

/// Identifies one per-index lookup subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LookupKey {
    /// Index looked up
    pub index: KittyIndex,
    /// Field looked up
    pub field: Field,
}

impl LookupKey {
    /// Key for the owner lookup of `index`.
    pub fn owner(index: KittyIndex) -> Self {
        Self {
            index,
            field: Field::Owner,
        }
    }

    /// Key for the DNA lookup of `index`.
    pub fn dna(index: KittyIndex) -> Self {
        Self {
            index,
            field: Field::Dna,
        }
    }

    fn source(self) -> SubscriptionSource {
        SubscriptionSource::Lookup {
            index: self.index,
            field: self.field,
        }
    }
}

/// A value delivered by a lookup subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupAnswer {
    /// Owner answer; `None` if the store holds no owner
    Owner(Option<OwnerId>),
    /// DNA answer; `None` if the store holds no DNA
    Dna(Option<KittyDna>),
}

/// Item of a lookup stream. `Closed` is appended once the remote side ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupItem {
    /// An answer or a subscription error
    Answer(Result<LookupAnswer, StoreError>),
    /// The remote side ended the subscription
    Closed,
}

type LookupStream = futures::stream::BoxStream<'static, LookupItem>;

/// Event pulled from the session's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// The count subscription emitted
    Count(Result<KittyCount, StoreError>),
    /// The count subscription ended
    CountClosed,
    /// A lookup subscription emitted
    Lookup {
        /// Which lookup
        key: LookupKey,
        /// What it emitted
        item: LookupItem,
    },
}

/// Effect of a count observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountChange {
    /// Same as the accepted count
    Unchanged,
    /// First observation of the session, equal to the accepted count (zero)
    Observed,
    /// Lookups issued for `from..to`
    Grew {
        /// Previous count
        from: KittyCount,
        /// New count
        to: KittyCount,
    },
    /// Lookups cancelled and entries trimmed for `to..from`
    Regressed {
        /// Previous count
        from: KittyCount,
        /// New count
        to: KittyCount,
        /// Lookup streams dropped
        cancelled: usize,
    },
}

impl CountChange {
    /// Whether reconciliation input changed.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// The map or the count changed
    pub changed: bool,
    /// Condition to report upstream
    pub error: Option<KittiesError>,
}

impl Applied {
    fn changed(changed: bool) -> Self {
        Self {
            changed,
            error: None,
        }
    }

    fn report(error: KittiesError) -> Self {
        Self {
            changed: false,
            error: Some(error),
        }
    }
}

/// Count-driven fan-out over a [`RemoteStore`].
pub struct Aggregator {
    store: Arc<dyn RemoteStore>,
    records: PartialKitties,
    count: KittyCount,
    count_observed: bool,
    count_stream: Option<StoreStream<KittyCount>>,
    lookups: StreamMap<LookupKey, LookupStream>,
    issued_at: BTreeMap<KittyIndex, Instant>,
    stalled: BTreeSet<KittyIndex>,
}

impl Aggregator {
    /// Create an aggregator over `store`. Nothing is subscribed until
    /// [`connect`](Self::connect).
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            records: PartialKitties::new(),
            count: 0,
            count_observed: false,
            count_stream: None,
            lookups: StreamMap::new(),
            issued_at: BTreeMap::new(),
            stalled: BTreeSet::new(),
        }
    }

    /// Start a fresh session: release everything, then subscribe to the count.
    pub fn connect(&mut self) {
        self.release();
        self.count_stream = Some(self.store.subscribe_count());
        tracing::debug!("subscribed to record count");
    }

    /// Switch to another store, starting a fresh session on it.
    pub fn reset(&mut self, store: Arc<dyn RemoteStore>) {
        self.release();
        self.store = store;
        self.connect();
    }

    /// Drop every subscription and discard accumulated data.
    ///
    /// Returns the number of lookup subscriptions cancelled.
    pub fn release(&mut self) -> usize {
        let cancelled = self.lookups.len();
        let had_count = self.count_stream.take().is_some();
        self.lookups.clear();
        self.records.clear();
        self.issued_at.clear();
        self.stalled.clear();
        self.count = 0;
        self.count_observed = false;

        if had_count || cancelled > 0 {
            tracing::debug!(cancelled, "released session subscriptions");
        }
        cancelled
    }

    // ─── Queries ─────────────────────────────────────────────

    /// Read-only view of the accumulating map.
    pub fn records(&self) -> &PartialKitties {
        &self.records
    }

    /// Accepted record count, which is also the high-water mark.
    pub fn count(&self) -> KittyCount {
        self.count
    }

    /// True while a count subscription is open.
    pub fn is_connected(&self) -> bool {
        self.count_stream.is_some()
    }

    /// Number of live lookup subscriptions.
    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Whether a lookup is live.
    pub fn has_lookup(&self, key: LookupKey) -> bool {
        self.lookups.contains_key(&key)
    }

    // ─── Count handling ──────────────────────────────────────

    /// Apply a count observation.
    pub fn on_count_observed(&mut self, observed: KittyCount) -> CountChange {
        let first = !self.count_observed;
        self.count_observed = true;
        let previous = self.count;

        match observed.cmp(&previous) {
            Ordering::Equal if first => CountChange::Observed,
            Ordering::Equal => CountChange::Unchanged,
            Ordering::Greater => {
                let now = Instant::now();
                for index in KittyIndex::range(previous, observed) {
                    self.records.track(index);
                    self.issued_at.insert(index, now);
                    for key in [LookupKey::owner(index), LookupKey::dna(index)] {
                        let stream = open_lookup(self.store.as_ref(), key);
                        self.lookups.insert(key, stream);
                    }
                }
                self.count = observed;
                tracing::debug!(from = previous, to = observed, "issued lookups");
                CountChange::Grew {
                    from: previous,
                    to: observed,
                }
            }
            Ordering::Less => {
                let mut cancelled = 0;
                for index in KittyIndex::range(observed, previous) {
                    for key in [LookupKey::owner(index), LookupKey::dna(index)] {
                        if self.lookups.remove(&key).is_some() {
                            cancelled += 1;
                        }
                    }
                }
                self.records.truncate(observed);
                self.issued_at.retain(|index, _| index.value() < observed);
                self.stalled.retain(|index| index.value() < observed);
                self.count = observed;
                tracing::warn!(
                    from = previous,
                    to = observed,
                    cancelled,
                    "record count regressed, trimmed lookups"
                );
                CountChange::Regressed {
                    from: previous,
                    to: observed,
                    cancelled,
                }
            }
        }
    }

    // ─── Resolution handling ─────────────────────────────────

    /// Store an owner answer. Returns `true` if the map changed.
    pub fn on_owner_resolved(&mut self, index: KittyIndex, owner: Option<OwnerId>) -> bool {
        self.records.resolve_owner(index, owner)
    }

    /// Store a DNA answer. Returns `true` if the map changed.
    pub fn on_dna_resolved(&mut self, index: KittyIndex, dna: Option<KittyDna>) -> bool {
        self.records.resolve_dna(index, dna)
    }

    /// Apply any event produced by [`next_event`](Self::next_event).
    pub fn apply(&mut self, event: AggregatorEvent) -> Applied {
        match event {
            AggregatorEvent::Count(Ok(observed)) => {
                let previous = self.count;
                let change = self.on_count_observed(observed);
                let error = matches!(change, CountChange::Regressed { .. }).then_some(
                    KittiesError::InconsistentCount {
                        observed,
                        high_water: previous,
                    },
                );
                Applied {
                    changed: change.is_change(),
                    error,
                }
            }
            AggregatorEvent::Count(Err(error)) => {
                tracing::warn!(%error, "count subscription failed, keeping accumulated data");
                Applied::report(KittiesError::subscription(SubscriptionSource::Count, &error))
            }
            AggregatorEvent::CountClosed => {
                self.count_stream = None;
                tracing::warn!("count subscription ended, keeping accumulated data");
                Applied::report(KittiesError::subscription_closed(SubscriptionSource::Count))
            }
            AggregatorEvent::Lookup { key, item } => match item {
                LookupItem::Answer(Ok(LookupAnswer::Owner(owner))) => {
                    Applied::changed(self.on_owner_resolved(key.index, owner))
                }
                LookupItem::Answer(Ok(LookupAnswer::Dna(dna))) => {
                    Applied::changed(self.on_dna_resolved(key.index, dna))
                }
                LookupItem::Answer(Err(error)) => {
                    tracing::warn!(index = %key.index, field = %key.field, %error, "lookup failed");
                    Applied::report(KittiesError::subscription(key.source(), &error))
                }
                LookupItem::Closed => {
                    tracing::debug!(index = %key.index, field = %key.field, "lookup ended");
                    Applied::report(KittiesError::subscription_closed(key.source()))
                }
            },
        }
    }

    // ─── Event intake ────────────────────────────────────────

    /// Wait for the next event from any open subscription.
    ///
    /// Pending forever when nothing is subscribed.
    pub async fn next_event(&mut self) -> AggregatorEvent {
        let Self {
            count_stream,
            lookups,
            ..
        } = self;

        tokio::select! {
            event = next_count(count_stream), if count_stream.is_some() => event,
            Some((key, item)) = lookups.next(), if !lookups.is_empty() => {
                AggregatorEvent::Lookup { key, item }
            }
            else => std::future::pending().await,
        }
    }

    /// Take an event that is ready right now, without waiting.
    ///
    /// Polled outside the task's cooperative budget: an exhausted budget would
    /// make ready channels report pending and split a burst across turns.
    pub fn try_next_event(&mut self) -> Option<AggregatorEvent> {
        tokio::task::unconstrained(self.next_event()).now_or_never()
    }

    // ─── Stall detection ─────────────────────────────────────

    /// Indices incomplete for at least `timeout`, each reported once.
    pub fn take_stalled(&mut self, now: Instant, timeout: Duration) -> Vec<KittiesError> {
        let mut reports = Vec::new();
        for (&index, &issued) in &self.issued_at {
            if self.stalled.contains(&index) {
                continue;
            }
            let waited = now.saturating_duration_since(issued);
            if waited < timeout {
                continue;
            }
            let Some(entry) = self.records.get(index) else {
                continue;
            };
            if entry.is_complete() {
                continue;
            }
            let missing = entry.missing();
            tracing::warn!(%index, ?missing, "lookup stalled");
            reports.push(KittiesError::StalledLookup {
                index,
                missing,
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            });
        }
        for report in &reports {
            if let KittiesError::StalledLookup { index, .. } = report {
                self.stalled.insert(*index);
            }
        }
        reports
    }
}

async fn next_count(stream: &mut Option<StoreStream<KittyCount>>) -> AggregatorEvent {
    match stream {
        Some(stream) => match stream.next().await {
            Some(observed) => AggregatorEvent::Count(observed),
            None => AggregatorEvent::CountClosed,
        },
        None => std::future::pending().await,
    }
}

fn open_lookup(store: &dyn RemoteStore, key: LookupKey) -> LookupStream {
    let answers = match key.field {
        Field::Owner => store
            .subscribe_owner(key.index)
            .map(|answer| LookupItem::Answer(answer.map(LookupAnswer::Owner)))
            .boxed(),
        Field::Dna => store
            .subscribe_dna(key.index)
            .map(|answer| LookupItem::Answer(answer.map(LookupAnswer::Dna)))
            .boxed(),
    };
    answers.chain(stream::once(async { LookupItem::Closed })).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitties_testkit::{dna, owner, MockLedger};

    fn connected(ledger: &MockLedger) -> Aggregator {
        let mut aggregator = Aggregator::new(Arc::new(ledger.clone()));
        aggregator.connect();
        aggregator
    }

    fn drain(aggregator: &mut Aggregator) -> usize {
        let mut applied = 0;
        while let Some(event) = aggregator.try_next_event() {
            aggregator.apply(event);
            applied += 1;
        }
        applied
    }

    #[tokio::test]
    async fn test_growth_issues_one_lookup_per_index_and_field() {
        let ledger = MockLedger::new();
        let mut aggregator = connected(&ledger);

        assert_eq!(aggregator.on_count_observed(2), CountChange::Grew { from: 0, to: 2 });
        assert_eq!(aggregator.active_lookups(), 4);
        assert_eq!(aggregator.on_count_observed(2), CountChange::Unchanged);
        assert_eq!(aggregator.on_count_observed(3), CountChange::Grew { from: 2, to: 3 });

        assert_eq!(aggregator.active_lookups(), 6);
        for i in 0..3 {
            assert_eq!(ledger.subscribe_calls(KittyIndex(i), Field::Owner), 1);
            assert_eq!(ledger.subscribe_calls(KittyIndex(i), Field::Dna), 1);
        }
    }

    #[tokio::test]
    async fn test_first_zero_count_is_observed_once() {
        let ledger = MockLedger::new();
        let mut aggregator = connected(&ledger);

        assert_eq!(aggregator.on_count_observed(0), CountChange::Observed);
        assert_eq!(aggregator.on_count_observed(0), CountChange::Unchanged);
        assert_eq!(aggregator.active_lookups(), 0);
    }

    #[tokio::test]
    async fn test_regression_cancels_exactly_the_trimmed_lookups() {
        let ledger = MockLedger::new();
        let mut aggregator = connected(&ledger);
        aggregator.on_count_observed(4);

        let change = aggregator.on_count_observed(1);
        assert_eq!(
            change,
            CountChange::Regressed {
                from: 4,
                to: 1,
                cancelled: 6
            }
        );
        assert_eq!(aggregator.records().indices().collect::<Vec<_>>(), vec![KittyIndex(0)]);
        for i in 1..4 {
            assert_eq!(ledger.cancellations(KittyIndex(i), Field::Owner), 1);
            assert_eq!(ledger.cancellations(KittyIndex(i), Field::Dna), 1);
        }
        assert_eq!(ledger.cancellations(KittyIndex(0), Field::Owner), 0);

        // Growing again re-issues only the trimmed range
        aggregator.on_count_observed(2);
        assert_eq!(ledger.subscribe_calls(KittyIndex(0), Field::Owner), 1);
        assert_eq!(ledger.subscribe_calls(KittyIndex(1), Field::Owner), 2);
    }

    #[tokio::test]
    async fn test_ready_events_are_applied_from_the_store() {
        let ledger = MockLedger::new();
        ledger.push_kitty(owner("alice"), dna(1));
        let mut aggregator = connected(&ledger);

        // count, owner(0), dna(0)
        assert_eq!(drain(&mut aggregator), 3);
        assert_eq!(aggregator.count(), 1);
        assert_eq!(aggregator.records().complete_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_takes_more_than_one_budget_of_ready_events() {
        let ledger = MockLedger::new();
        for seed in 0..100 {
            ledger.push_kitty(owner("alice"), dna(seed));
        }
        let mut aggregator = connected(&ledger);

        // count plus two answers per index, all ready at once
        assert_eq!(drain(&mut aggregator), 201);
        assert_eq!(aggregator.records().complete_count(), 100);
    }

    #[tokio::test]
    async fn test_count_error_keeps_data() {
        let ledger = MockLedger::new();
        ledger.push_kitty(owner("alice"), dna(1));
        let mut aggregator = connected(&ledger);
        drain(&mut aggregator);

        ledger.fail_count(StoreError::disconnected("node restarted"));
        let event = aggregator.try_next_event().unwrap();
        let applied = aggregator.apply(event);

        assert!(!applied.changed);
        assert!(matches!(
            applied.error,
            Some(KittiesError::SubscriptionFailure {
                source_kind: SubscriptionSource::Count,
                ..
            })
        ));
        assert_eq!(aggregator.records().complete_count(), 1);
    }

    #[tokio::test]
    async fn test_release_drops_everything() {
        let ledger = MockLedger::new();
        ledger.push_kitty(owner("alice"), dna(1));
        ledger.push_kitty(owner("bob"), dna(2));
        let mut aggregator = connected(&ledger);
        drain(&mut aggregator);

        assert_eq!(aggregator.release(), 4);
        assert!(!aggregator.is_connected());
        assert!(aggregator.records().is_empty());
        assert_eq!(ledger.live_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_indices_reported_once() {
        let ledger = MockLedger::new();
        let mut aggregator = connected(&ledger);
        aggregator.on_count_observed(2);
        aggregator.on_owner_resolved(KittyIndex(0), Some(OwnerId::from("alice")));
        aggregator.on_dna_resolved(KittyIndex(0), Some(dna(3)));
        aggregator.on_owner_resolved(KittyIndex(1), Some(OwnerId::from("bob")));

        let timeout = Duration::from_secs(10);
        assert!(aggregator.take_stalled(Instant::now(), timeout).is_empty());

        tokio::time::advance(timeout).await;
        let reports = aggregator.take_stalled(Instant::now(), timeout);
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            &reports[0],
            KittiesError::StalledLookup { index, missing, .. }
                if *index == KittyIndex(1) && missing == &vec![Field::Dna]
        ));

        assert!(aggregator.take_stalled(Instant::now(), timeout).is_empty());
    }
}
