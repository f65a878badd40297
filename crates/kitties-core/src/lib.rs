//! # Kitties Core
//!
//! Data model and contracts for the kitties live list.
//!
//! ## Contents
//!
//! - [`types`]: record identifiers, DNA, owners and the three-state
//!   [`FieldState`] used while lookups are in flight
//! - [`records`]: the ordered accumulating map of partial records
//! - [`snapshot`]: the published, reconciled list
//! - [`store`]: the [`RemoteStore`] subscription contract
//! - [`commands`]: the [`KittyCommands`] write side channel
//! - [`errors`]: [`StoreError`] and the pipeline taxonomy [`KittiesError`]
//!
//! This crate has no async runtime dependency. The pipeline that drives these types
//! lives in `kitties-app`.

pub mod commands;
pub mod errors;
pub mod records;
pub mod snapshot;
pub mod store;
pub mod types;

pub use commands::{KittyCommands, TxStatus};
pub use errors::{ErrorSeverity, KittiesError, KittiesResult, StoreError, SubscriptionSource};
pub use records::PartialKitties;
pub use snapshot::{Snapshot, SnapshotEntry};
pub use store::{RemoteStore, StoreStream};
pub use types::{Field, FieldState, Kitty, KittyCount, KittyDna, KittyIndex, OwnerId, PartialKitty};
