//! Kitties Testing Infrastructure
//!
//! Shared mocks and generators for the pipeline crates.
//!
//! - [`MockLedger`]: in-memory [`RemoteStore`](kitties_core::RemoteStore) and
//!   [`KittyCommands`](kitties_core::KittyCommands) with subscription accounting
//! - [`fixtures`]: record builders and a tracing initialiser
//! - [`strategies`]: proptest strategies for arrival orders
//!
//! Add it to `[dev-dependencies]`:
//! ```toml
//! kitties-testkit = { workspace = true }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod mock_ledger;
pub mod strategies;

pub use fixtures::*;
pub use mock_ledger::{derive_dna, MockLedger};
pub use strategies::{
    arb_dna, arb_growth_schedule, arb_owner, arb_schedule, GrowthSchedule, GrowthStep, Resolution,
    Schedule,
};
