//! # Reconciler
//!
//! Pure function from the accumulating map and the observed count to a
//! [`Snapshot`]. It reads the map in index order and never looks at when or in
//! which order answers arrived, so two calls with equal inputs always produce
//! equal snapshots.

use kitties_core::{
    KittyCount, KittyIndex, PartialKitties, PartialKitty, Snapshot, SnapshotEntry,
};

use crate::config::SnapshotPolicy;

/// Build the snapshot for indices `0..count`.
pub fn reconcile(records: &PartialKitties, count: KittyCount, policy: SnapshotPolicy) -> Snapshot {
    let capacity = match policy {
        SnapshotPolicy::Placeholder => count as usize,
        SnapshotPolicy::Omit | SnapshotPolicy::ContiguousPrefix => records.count(),
    };
    let mut entries = Vec::with_capacity(capacity);

    for index in KittyIndex::range(0, count) {
        match records.get(index).and_then(PartialKitty::complete) {
            Some(kitty) => entries.push(SnapshotEntry::Ready(kitty)),
            None => match policy {
                SnapshotPolicy::Omit => {}
                SnapshotPolicy::ContiguousPrefix => break,
                SnapshotPolicy::Placeholder => entries.push(SnapshotEntry::Pending { index }),
            },
        }
    }

    Snapshot::from_entries(entries)
}
