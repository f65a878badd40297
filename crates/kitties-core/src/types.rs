//! # Record Types
//!
//! Identifiers and values carried through the pipeline. Everything here is
//! plain data: serializable, cheap to clone and free of runtime concerns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of records the remote store reports.
///
/// Observations may be stale, so a later value can be smaller than an
/// earlier one.
pub type KittyCount = u32;

/// Dense, zero-based record identifier assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KittyIndex(pub u32);

impl KittyIndex {
    /// Create an index.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw index value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// All indices in `[start, end)`.
    pub fn range(start: KittyCount, end: KittyCount) -> impl Iterator<Item = KittyIndex> {
        (start..end).map(KittyIndex)
    }
}

impl From<u32> for KittyIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for KittyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque account identifier in its string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an account key string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the account key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque DNA bytes of a kitty. Immutable once created.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KittyDna(Vec<u8>);

impl KittyDna {
    /// Wrap raw DNA bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw DNA bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lower-case hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<[u8; 16]> for KittyDna {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for KittyDna {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KittyDna({})", self.to_hex())
    }
}

impl fmt::Display for KittyDna {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// A fully resolved record as it appears in a published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kitty {
    /// Position in the remote index space
    pub index: KittyIndex,
    /// DNA payload
    pub dna: KittyDna,
    /// Current owner
    pub owner: OwnerId,
}

/// The two per-index lookups the remote store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Owner lookup
    Owner,
    /// DNA lookup
    Dna,
}

impl Field {
    /// Both fields, in lookup issue order.
    pub const ALL: [Field; 2] = [Field::Owner, Field::Dna];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Dna => write!(f, "dna"),
        }
    }
}

/// Resolution state of one field of a partial record.
///
/// `Absent` means the store answered and had nothing; `Pending` means no
/// answer has arrived yet. Only `Resolved` counts toward completeness.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum FieldState<T> {
    /// Lookup issued, nothing received
    #[default]
    Pending,
    /// Store reported no value
    Absent,
    /// Store reported a value
    Resolved(T),
}

impl<T> FieldState<T> {
    /// Build from a store answer: `None` becomes `Absent`.
    pub fn from_answer(answer: Option<T>) -> Self {
        match answer {
            Some(value) => Self::Resolved(value),
            None => Self::Absent,
        }
    }

    /// Resolved value, if any.
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// True once a value has been received.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// True while no answer has been received.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Accumulation state for one index while its lookups are in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialKitty {
    /// Index this entry accumulates
    pub index: KittyIndex,
    /// Owner lookup state
    pub owner: FieldState<OwnerId>,
    /// DNA lookup state
    pub dna: FieldState<KittyDna>,
}

impl PartialKitty {
    /// Fresh entry with both lookups pending.
    pub fn pending(index: KittyIndex) -> Self {
        Self {
            index,
            owner: FieldState::Pending,
            dna: FieldState::Pending,
        }
    }

    /// The complete record, if both fields are resolved.
    pub fn complete(&self) -> Option<Kitty> {
        match (&self.owner, &self.dna) {
            (FieldState::Resolved(owner), FieldState::Resolved(dna)) => Some(Kitty {
                index: self.index,
                dna: dna.clone(),
                owner: owner.clone(),
            }),
            _ => None,
        }
    }

    /// True if both fields are resolved.
    pub fn is_complete(&self) -> bool {
        self.owner.is_resolved() && self.dna.is_resolved()
    }

    /// Fields that are not resolved yet.
    pub fn missing(&self) -> Vec<Field> {
        let mut missing = Vec::with_capacity(2);
        if !self.owner.is_resolved() {
            missing.push(Field::Owner);
        }
        if !self.dna.is_resolved() {
            missing.push(Field::Dna);
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_complete_requires_both_fields() {
        let mut partial = PartialKitty::pending(KittyIndex(3));
        assert!(partial.complete().is_none());
        assert_eq!(partial.missing(), vec![Field::Owner, Field::Dna]);

        partial.owner = FieldState::Resolved(OwnerId::from("alice"));
        assert!(partial.complete().is_none());
        assert_eq!(partial.missing(), vec![Field::Dna]);

        partial.dna = FieldState::Resolved(KittyDna::from([7u8; 16]));
        let kitty = partial.complete().unwrap();
        assert_eq!(kitty.index, KittyIndex(3));
        assert_eq!(kitty.owner.as_str(), "alice");
        assert!(partial.missing().is_empty());
    }

    #[test]
    fn test_absent_is_not_resolved() {
        let mut partial = PartialKitty::pending(KittyIndex(0));
        partial.owner = FieldState::from_answer(None);
        partial.dna = FieldState::Resolved(KittyDna::new(vec![1, 2]));

        assert_eq!(partial.owner, FieldState::Absent);
        assert!(!partial.owner.is_pending());
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_dna_renders_as_hex() {
        let dna = KittyDna::new(vec![0xde, 0xad, 0x01]);
        assert_eq!(dna.to_hex(), "dead01");
        assert_eq!(dna.to_string(), "0xdead01");
        assert_eq!(format!("{dna:?}"), "KittyDna(dead01)");
    }

    #[test]
    fn test_index_range() {
        let indices: Vec<_> = KittyIndex::range(2, 5).collect();
        assert_eq!(indices, vec![KittyIndex(2), KittyIndex(3), KittyIndex(4)]);
        assert_eq!(KittyIndex::range(4, 4).count(), 0);
    }
}
