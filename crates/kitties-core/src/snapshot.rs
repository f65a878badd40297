//! Published view of the record list.

use serde::{Deserialize, Serialize};

use crate::types::{Kitty, KittyIndex, OwnerId};

/// One position in a published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SnapshotEntry {
    /// Both fields resolved
    Ready(Kitty),
    /// Placeholder for an index whose lookups have not all resolved
    Pending {
        /// Index still in flight
        index: KittyIndex,
    },
}

impl SnapshotEntry {
    /// Index of this entry.
    pub fn index(&self) -> KittyIndex {
        match self {
            Self::Ready(kitty) => kitty.index,
            Self::Pending { index } => *index,
        }
    }

    /// The record, if resolved.
    pub fn kitty(&self) -> Option<&Kitty> {
        match self {
            Self::Ready(kitty) => Some(kitty),
            Self::Pending { .. } => None,
        }
    }
}

/// Ordered, externally visible list of records.
///
/// Entries are ascending by index. Snapshots compare by value, which is what
/// the publisher uses to suppress duplicate notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from entries already in ascending index order.
    pub fn from_entries(entries: Vec<SnapshotEntry>) -> Self {
        debug_assert!(
            entries.windows(2).all(|w| w[0].index() < w[1].index()),
            "snapshot entries must be strictly ascending"
        );
        Self { entries }
    }

    /// All entries.
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Number of entries (placeholders included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved records in index order.
    pub fn kitties(&self) -> impl Iterator<Item = &Kitty> {
        self.entries.iter().filter_map(SnapshotEntry::kitty)
    }

    /// Number of resolved records.
    pub fn ready_count(&self) -> usize {
        self.kitties().count()
    }

    /// Indices present in the snapshot, in order.
    pub fn indices(&self) -> Vec<KittyIndex> {
        self.entries.iter().map(SnapshotEntry::index).collect()
    }

    /// Look up a resolved record by index.
    pub fn get(&self, index: KittyIndex) -> Option<&Kitty> {
        self.entries
            .binary_search_by_key(&index, SnapshotEntry::index)
            .ok()
            .and_then(|pos| self.entries[pos].kitty())
    }

    /// Resolved records owned by `owner`.
    pub fn owned_by<'a>(&'a self, owner: &'a OwnerId) -> impl Iterator<Item = &'a Kitty> + 'a {
        self.kitties().filter(move |kitty| &kitty.owner == owner)
    }

    /// True if every entry of `earlier` appears unchanged at the front of `self`.
    pub fn extends(&self, earlier: &Snapshot) -> bool {
        self.entries.starts_with(&earlier.entries)
    }

    /// True if every resolved record of `earlier` is present unchanged in `self`.
    pub fn retains(&self, earlier: &Snapshot) -> bool {
        earlier
            .kitties()
            .all(|kitty| self.get(kitty.index) == Some(kitty))
    }
}
