//! In-memory kitties ledger.
//!
//! Implements both [`RemoteStore`] and [`KittyCommands`]. Every subscription
//! immediately yields the current value (if any) and then every later change.
//! Subscriptions and drops are counted per key so tests can check that each
//! lookup is issued once and cancelled once.

use futures::StreamExt;
use kitties_core::{
    Field, KittiesError, KittiesResult, Kitty, KittyCommands, KittyCount, KittyDna, KittyIndex,
    OwnerId, RemoteStore, StoreError, StoreStream, TxStatus,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Feed<T> = mpsc::UnboundedSender<Result<T, StoreError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SubscriptionKey {
    Count,
    Lookup(KittyIndex, Field),
}

#[derive(Default)]
struct LedgerState {
    count: KittyCount,
    owners: BTreeMap<KittyIndex, Option<OwnerId>>,
    dnas: BTreeMap<KittyIndex, Option<KittyDna>>,
    count_feeds: Vec<Feed<KittyCount>>,
    owner_feeds: BTreeMap<KittyIndex, Vec<Feed<Option<OwnerId>>>>,
    dna_feeds: BTreeMap<KittyIndex, Vec<Feed<Option<KittyDna>>>>,
    subscribed: BTreeMap<SubscriptionKey, usize>,
    dropped: BTreeMap<SubscriptionKey, usize>,
    commands: usize,
    blocks: u64,
}

impl LedgerState {
    fn set_count(&mut self, count: KittyCount) {
        self.count = count;
        self.count_feeds.retain(|feed| feed.send(Ok(count)).is_ok());
    }

    fn set_owner(&mut self, index: KittyIndex, owner: Option<OwnerId>) {
        self.owners.insert(index, owner.clone());
        if let Some(feeds) = self.owner_feeds.get_mut(&index) {
            feeds.retain(|feed| feed.send(Ok(owner.clone())).is_ok());
        }
    }

    fn set_dna(&mut self, index: KittyIndex, dna: Option<KittyDna>) {
        self.dnas.insert(index, dna.clone());
        if let Some(feeds) = self.dna_feeds.get_mut(&index) {
            feeds.retain(|feed| feed.send(Ok(dna.clone())).is_ok());
        }
    }

    /// Append a record in ledger order: DNA, owner, then the count.
    fn append(&mut self, owner: OwnerId, dna: KittyDna) -> KittyIndex {
        let index = KittyIndex(self.count);
        self.set_dna(index, Some(dna));
        self.set_owner(index, Some(owner));
        self.set_count(self.count + 1);
        index
    }

    fn kitty(&self, index: KittyIndex) -> Option<Kitty> {
        let owner = self.owners.get(&index)?.clone()?;
        let dna = self.dnas.get(&index)?.clone()?;
        Some(Kitty { index, dna, owner })
    }

    fn next_block(&mut self) -> TxStatus {
        self.blocks += 1;
        let hash = blake3::hash(&self.blocks.to_le_bytes());
        TxStatus::Finalized(format!("0x{}", hash.to_hex()))
    }
}

/// Decrements the live subscription count of its key when dropped.
struct DropGuard {
    state: Arc<Mutex<LedgerState>>,
    key: SubscriptionKey,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        *self.state.lock().dropped.entry(self.key).or_default() += 1;
    }
}

/// Shared in-memory ledger. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MockLedger {
    /// Empty ledger with a count of zero.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Ledger writes ───────────────────────────────────────

    /// Set the record count and notify count subscribers.
    pub fn set_count(&self, count: KittyCount) {
        self.state.lock().set_count(count);
    }

    /// Store an owner answer for `index` and notify its subscribers.
    pub fn set_owner(&self, index: KittyIndex, owner: Option<OwnerId>) {
        self.state.lock().set_owner(index, owner);
    }

    /// Store a DNA answer for `index` and notify its subscribers.
    pub fn set_dna(&self, index: KittyIndex, dna: Option<KittyDna>) {
        self.state.lock().set_dna(index, dna);
    }

    /// Append a complete record the way the ledger does on create.
    pub fn push_kitty(&self, owner: OwnerId, dna: KittyDna) -> KittyIndex {
        self.state.lock().append(owner, dna)
    }

    /// Deliver an error to every count subscriber.
    pub fn fail_count(&self, error: StoreError) {
        self.state
            .lock()
            .count_feeds
            .retain(|feed| feed.send(Err(error.clone())).is_ok());
    }

    /// Deliver an error to every subscriber of one lookup.
    pub fn fail_lookup(&self, index: KittyIndex, field: Field, error: StoreError) {
        let mut state = self.state.lock();
        match field {
            Field::Owner => {
                if let Some(feeds) = state.owner_feeds.get_mut(&index) {
                    feeds.retain(|feed| feed.send(Err(error.clone())).is_ok());
                }
            }
            Field::Dna => {
                if let Some(feeds) = state.dna_feeds.get_mut(&index) {
                    feeds.retain(|feed| feed.send(Err(error.clone())).is_ok());
                }
            }
        }
    }

    /// End every open count subscription from the ledger side.
    pub fn close_count(&self) {
        self.state.lock().count_feeds.clear();
    }

    // ─── Ledger reads ────────────────────────────────────────

    /// Current record count.
    pub fn count(&self) -> KittyCount {
        self.state.lock().count
    }

    /// Complete records below the count, in index order.
    pub fn kitties(&self) -> Vec<Kitty> {
        let state = self.state.lock();
        KittyIndex::range(0, state.count)
            .filter_map(|index| state.kitty(index))
            .collect()
    }

    /// Commands received, including rejected ones.
    pub fn commands_received(&self) -> usize {
        self.state.lock().commands
    }

    // ─── Subscription accounting ─────────────────────────────

    /// Times a lookup was subscribed.
    pub fn subscribe_calls(&self, index: KittyIndex, field: Field) -> usize {
        self.counter(|s| &s.subscribed, SubscriptionKey::Lookup(index, field))
    }

    /// Times a lookup stream was dropped.
    pub fn cancellations(&self, index: KittyIndex, field: Field) -> usize {
        self.counter(|s| &s.dropped, SubscriptionKey::Lookup(index, field))
    }

    /// Times the count was subscribed.
    pub fn count_subscriptions(&self) -> usize {
        self.counter(|s| &s.subscribed, SubscriptionKey::Count)
    }

    /// Subscriptions (count and lookups) not yet dropped.
    pub fn live_subscriptions(&self) -> usize {
        let state = self.state.lock();
        let subscribed: usize = state.subscribed.values().sum();
        let dropped: usize = state.dropped.values().sum();
        subscribed - dropped
    }

    fn counter(
        &self,
        table: impl Fn(&LedgerState) -> &BTreeMap<SubscriptionKey, usize>,
        key: SubscriptionKey,
    ) -> usize {
        let state = self.state.lock();
        table(&*state).get(&key).copied().unwrap_or(0)
    }

    fn open<T: Send + 'static>(
        &self,
        key: SubscriptionKey,
        initial: Option<T>,
        register: impl FnOnce(&mut LedgerState, Feed<T>),
    ) -> StoreStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(value) = initial {
            let _ = tx.send(Ok(value));
        }
        {
            let mut state = self.state.lock();
            *state.subscribed.entry(key).or_default() += 1;
            register(&mut state, tx);
        }

        let guard = DropGuard {
            state: Arc::clone(&self.state),
            key,
        };
        UnboundedReceiverStream::new(rx)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed()
    }
}

impl RemoteStore for MockLedger {
    fn subscribe_count(&self) -> StoreStream<KittyCount> {
        let current = self.count();
        self.open(SubscriptionKey::Count, Some(current), |state, feed| {
            state.count_feeds.push(feed);
        })
    }

    fn subscribe_owner(&self, index: KittyIndex) -> StoreStream<Option<OwnerId>> {
        let current = self.state.lock().owners.get(&index).cloned();
        self.open(
            SubscriptionKey::Lookup(index, Field::Owner),
            current,
            |state, feed| state.owner_feeds.entry(index).or_default().push(feed),
        )
    }

    fn subscribe_dna(&self, index: KittyIndex) -> StoreStream<Option<KittyDna>> {
        let current = self.state.lock().dnas.get(&index).cloned();
        self.open(
            SubscriptionKey::Lookup(index, Field::Dna),
            current,
            |state, feed| state.dna_feeds.entry(index).or_default().push(feed),
        )
    }
}

#[async_trait::async_trait]
impl KittyCommands for MockLedger {
    async fn create(&self, signer: &OwnerId) -> KittiesResult<TxStatus> {
        let mut state = self.state.lock();
        state.commands += 1;
        let dna = derive_dna(signer, KittyIndex(state.count));
        state.append(signer.clone(), dna);
        Ok(state.next_block())
    }

    async fn transfer(
        &self,
        signer: &OwnerId,
        to: &OwnerId,
        index: KittyIndex,
    ) -> KittiesResult<TxStatus> {
        let mut state = self.state.lock();
        state.commands += 1;
        if signer == to {
            return Err(KittiesError::dispatch("transfer", "AlreadyOwned"));
        }
        if state.owners.get(&index) != Some(&Some(signer.clone())) {
            return Err(KittiesError::dispatch("transfer", "NotOwner"));
        }
        state.set_owner(index, Some(to.clone()));
        Ok(state.next_block())
    }

    async fn breed(
        &self,
        signer: &OwnerId,
        parent_a: KittyIndex,
        parent_b: KittyIndex,
    ) -> KittiesResult<TxStatus> {
        let mut state = self.state.lock();
        state.commands += 1;
        if parent_a == parent_b {
            return Err(KittiesError::dispatch("breed", "SameParentIndex"));
        }
        let (Some(Some(dna_a)), Some(Some(dna_b))) =
            (state.dnas.get(&parent_a), state.dnas.get(&parent_b))
        else {
            return Err(KittiesError::dispatch("breed", "InvalidKittyIndex"));
        };

        let selector = derive_dna(signer, KittyIndex(state.count));
        let child: Vec<u8> = selector
            .as_bytes()
            .iter()
            .zip(dna_a.as_bytes().iter().zip(dna_b.as_bytes()))
            .map(|(sel, (a, b))| (sel & a) | (!sel & b))
            .collect();
        state.append(signer.clone(), KittyDna::new(child));
        Ok(state.next_block())
    }
}

/// 16 bytes of DNA derived from the creator and the new index.
pub fn derive_dna(owner: &OwnerId, index: KittyIndex) -> KittyDna {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_str().as_bytes());
    hasher.update(&index.value().to_le_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    KittyDna::from(bytes)
}
