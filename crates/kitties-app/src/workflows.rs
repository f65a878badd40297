//! Command workflows.
//!
//! Thin wrappers over [`KittyCommands`] that check arguments against the last
//! known snapshot before dispatching, so obviously doomed transactions are never
//! sent. The ledger still has the final word. Results show up in the live list
//! only once the count (or an owner lookup) changes remotely.

use kitties_core::{KittiesError, KittiesResult, KittyCommands, KittyIndex, OwnerId, Snapshot, TxStatus};

/// Create a kitty owned by `signer`.
pub async fn create_kitty(
    commands: &dyn KittyCommands,
    signer: &OwnerId,
) -> KittiesResult<TxStatus> {
    tracing::info!(%signer, "dispatching create");
    let status = commands.create(signer).await;
    log_outcome("create", &status);
    status
}

/// Transfer `index` from `signer` to `to`.
///
/// Rejected locally when `to` is the signer or when the snapshot shows the
/// record belongs to someone else. An index absent from the snapshot is passed
/// through, since the list may simply not have caught up.
pub async fn transfer_kitty(
    commands: &dyn KittyCommands,
    snapshot: &Snapshot,
    signer: &OwnerId,
    to: &OwnerId,
    index: KittyIndex,
) -> KittiesResult<TxStatus> {
    if signer == to {
        return Err(reject("transfer", "AlreadyOwned"));
    }
    if let Some(kitty) = snapshot.get(index) {
        if &kitty.owner != signer {
            return Err(reject("transfer", "NotOwner"));
        }
    }

    tracing::info!(%signer, %to, %index, "dispatching transfer");
    let status = commands.transfer(signer, to, index).await;
    log_outcome("transfer", &status);
    status
}

/// Breed a kitty from two distinct parents present in the snapshot.
pub async fn breed_kitties(
    commands: &dyn KittyCommands,
    snapshot: &Snapshot,
    signer: &OwnerId,
    parent_a: KittyIndex,
    parent_b: KittyIndex,
) -> KittiesResult<TxStatus> {
    if parent_a == parent_b {
        return Err(reject("breed", "SameParentIndex"));
    }
    if snapshot.get(parent_a).is_none() || snapshot.get(parent_b).is_none() {
        return Err(reject("breed", "InvalidKittyIndex"));
    }

    tracing::info!(%signer, %parent_a, %parent_b, "dispatching breed");
    let status = commands.breed(signer, parent_a, parent_b).await;
    log_outcome("breed", &status);
    status
}

fn reject(command: &str, reason: &str) -> KittiesError {
    tracing::warn!(command, reason, "command rejected before dispatch");
    KittiesError::dispatch(command, reason)
}

fn log_outcome(command: &str, status: &KittiesResult<TxStatus>) {
    match status {
        Ok(status) => tracing::info!(command, %status, "command dispatched"),
        Err(error) => tracing::warn!(command, %error, "command failed"),
    }
}
