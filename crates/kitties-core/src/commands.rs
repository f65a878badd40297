//! Write side of the remote ledger.
//!
//! The live list never calls these itself. A creation shows up in the list
//! only through the count subscription growing afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::KittiesResult;
use crate::types::{KittyIndex, OwnerId};

/// Progress of a submitted transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "block")]
pub enum TxStatus {
    /// Accepted into the pool
    Ready,
    /// Included in a block
    InBlock(String),
    /// Block finalized
    Finalized(String),
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Current transaction status: Ready"),
            Self::InBlock(hash) => write!(f, "Current transaction status: InBlock {hash}"),
            Self::Finalized(hash) => write!(f, "Finalized. Block hash: {hash}"),
        }
    }
}

/// Dispatchable kitty commands, signed by `signer`.
#[async_trait]
pub trait KittyCommands: Send + Sync {
    /// Create a new kitty owned by `signer`.
    async fn create(&self, signer: &OwnerId) -> KittiesResult<TxStatus>;

    /// Transfer `index` from `signer` to `to`.
    async fn transfer(&self, signer: &OwnerId, to: &OwnerId, index: KittyIndex)
        -> KittiesResult<TxStatus>;

    /// Breed a new kitty from two parents owned by `signer`.
    async fn breed(
        &self,
        signer: &OwnerId,
        parent_a: KittyIndex,
        parent_b: KittyIndex,
    ) -> KittiesResult<TxStatus>;
}
