//! Remote Store Contract
//!
//! The ledger query interface the pipeline reads from. Every method opens a
//! long-lived subscription and returns it as a stream: the store may emit any
//! number of values over time (republished data, count growth) and the
//! subscription lives until the stream is dropped. Dropping the stream is the
//! cancellation signal; implementations must release the underlying
//! subscription when that happens.
//!
//! Lookups answer `Ok(None)` when the store holds no value for the index.

use futures::stream::BoxStream;

use crate::errors::StoreError;
use crate::types::{KittyCount, KittyDna, KittyIndex, OwnerId};

/// Stream of values from one remote subscription.
pub type StoreStream<T> = BoxStream<'static, Result<T, StoreError>>;

/// Read side of the remote ledger.
pub trait RemoteStore: Send + Sync {
    /// Subscribe to the record count.
    fn subscribe_count(&self) -> StoreStream<KittyCount>;

    /// Subscribe to the owner of `index`.
    fn subscribe_owner(&self, index: KittyIndex) -> StoreStream<Option<OwnerId>>;

    /// Subscribe to the DNA of `index`.
    fn subscribe_dna(&self, index: KittyIndex) -> StoreStream<Option<KittyDna>>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<S> {
    fn subscribe_count(&self) -> StoreStream<KittyCount> {
        (**self).subscribe_count()
    }

    fn subscribe_owner(&self, index: KittyIndex) -> StoreStream<Option<OwnerId>> {
        (**self).subscribe_owner(index)
    }

    fn subscribe_dna(&self, index: KittyIndex) -> StoreStream<Option<KittyDna>> {
        (**self).subscribe_dna(index)
    }
}
