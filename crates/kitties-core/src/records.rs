//! # Partial Record Map
//!
//! [`PartialKitties`] is the accumulating map the aggregator owns. It is keyed
//! by [`KittyIndex`] and ordered, so readers always walk indices ascending no
//! matter in which order lookups answered.
//!
//! Mutations follow two rules:
//! - Only tracked indices accept values. An answer for an index that was
//!   never tracked (or was trimmed away) is dropped.
//! - Each field is last-write-wins. A mutation reports whether the stored
//!   state actually changed, so callers can skip needless reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{FieldState, KittyCount, KittyDna, KittyIndex, OwnerId, PartialKitty};

/// Ordered map of in-flight and completed partial records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialKitties {
    items: BTreeMap<KittyIndex, PartialKitty>,
}

impl PartialKitties {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    // ─── Queries ─────────────────────────────────────────────

    /// Get the entry for an index.
    pub fn get(&self, index: KittyIndex) -> Option<&PartialKitty> {
        self.items.get(&index)
    }

    /// Check whether an index is tracked.
    pub fn contains(&self, index: KittyIndex) -> bool {
        self.items.contains_key(&index)
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &PartialKitty> {
        self.items.values()
    }

    /// Tracked indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = KittyIndex> + '_ {
        self.items.keys().copied()
    }

    /// Number of tracked indices.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of entries with both fields resolved.
    pub fn complete_count(&self) -> usize {
        self.items.values().filter(|p| p.is_complete()).count()
    }

    // ─── Mutations ───────────────────────────────────────────

    /// Start tracking an index with both fields pending.
    ///
    /// Returns `false` if the index was already tracked; the existing entry is
    /// left untouched.
    pub fn track(&mut self, index: KittyIndex) -> bool {
        if self.items.contains_key(&index) {
            return false;
        }
        self.items.insert(index, PartialKitty::pending(index));
        true
    }

    /// Store an owner answer. Returns `true` if the stored state changed.
    pub fn resolve_owner(&mut self, index: KittyIndex, owner: Option<OwnerId>) -> bool {
        match self.items.get_mut(&index) {
            Some(entry) => replace_if_changed(&mut entry.owner, FieldState::from_answer(owner)),
            None => false,
        }
    }

    /// Store a DNA answer. Returns `true` if the stored state changed.
    pub fn resolve_dna(&mut self, index: KittyIndex, dna: Option<KittyDna>) -> bool {
        match self.items.get_mut(&index) {
            Some(entry) => replace_if_changed(&mut entry.dna, FieldState::from_answer(dna)),
            None => false,
        }
    }

    /// Drop every entry at or beyond `count`, returning the removed indices.
    pub fn truncate(&mut self, count: KittyCount) -> Vec<KittyIndex> {
        let removed = self.items.split_off(&KittyIndex(count));
        removed.into_keys().collect()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut FieldState<T>, next: FieldState<T>) -> bool {
    if *slot == next {
        return false;
    }
    *slot = next;
    true
}

impl<'a> IntoIterator for &'a PartialKitties {
    type Item = &'a PartialKitty;
    type IntoIter = std::collections::btree_map::Values<'a, KittyIndex, PartialKitty>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.values()
    }
}

// ─── Tests ───────────────────────────────────────────────────
