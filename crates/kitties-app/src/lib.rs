//! # Kitties App
//!
//! Live, ordered list of kitties assembled from a [`RemoteStore`] that only
//! offers a record count and per-index lookups.
//!
//! ## Architecture
//!
//! ```text
//! RemoteStore ──count──▶ Aggregator ──PartialKitties──▶ reconcile() ──Snapshot──▶ Publisher
//!             ◀─lookups─┘      ▲                                                 │
//!                              └──────────── Scheduler (one tokio task) ─────────┘
//! ```
//!
//! - [`aggregator`]: subscribes to the count and fans out owner and DNA lookups
//! - [`reconciler`]: pure map → snapshot function
//! - [`publisher`]: value-deduplicated fan-out plus the error channel
//! - [`scheduler`]: the turn loop that coalesces events
//! - [`pipeline`]: the handle applications hold
//! - [`workflows`]: create / transfer / breed with local checks
//!
//! [`RemoteStore`]: kitties_core::RemoteStore

pub mod aggregator;
pub mod config;
pub mod pipeline;
pub mod publisher;
pub mod reconciler;
pub mod scheduler;
pub mod workflows;

pub use aggregator::{Aggregator, AggregatorEvent, CountChange, LookupKey};
pub use config::{PipelineConfig, SnapshotPolicy};
pub use pipeline::{KittiesPipeline, SnapshotSubscription};
pub use publisher::{ListenerId, Publisher};
pub use reconciler::reconcile;
pub use scheduler::{PipelineStats, Scheduler};
pub use workflows::{breed_kitties, create_kitty, transfer_kitty};

pub use kitties_core;
