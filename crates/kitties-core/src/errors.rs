//! Error types for the remote store contract and the live-list pipeline.
//!
//! None of these errors stop the snapshot stream. They are reported on a side
//! channel so the UI can render degraded data instead of nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Field, KittyCount, KittyIndex};

/// Failure reported by a remote store subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    /// Connection to the remote node was lost
    #[error("Remote store disconnected: {reason}")]
    Disconnected { reason: String },

    /// A value could not be decoded
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// The remote node refused the query
    #[error("Query rejected: {reason}")]
    Rejected { reason: String },
}

impl StoreError {
    /// Create a disconnect error
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Which subscription produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SubscriptionSource {
    /// The record count subscription
    Count,
    /// A per-index lookup
    Lookup {
        /// Index looked up
        index: KittyIndex,
        /// Field looked up
        field: Field,
    },
}

impl fmt::Display for SubscriptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Lookup { index, field } => write!(f, "{field} lookup {index}"),
        }
    }
}

/// How loudly an error should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational
    Info,
    /// Data is degraded but usable
    Warning,
    /// An operation failed
    Error,
}

/// Pipeline-level error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum KittiesError {
    /// A count or lookup subscription reported an error or ended
    #[error("Subscription failure on {source_kind}: {reason}")]
    SubscriptionFailure {
        source_kind: SubscriptionSource,
        reason: String,
    },

    /// The count dropped below the highest index already subscribed
    #[error("Record count regressed to {observed} (high-water mark {high_water})")]
    InconsistentCount {
        observed: KittyCount,
        high_water: KittyCount,
    },

    /// An index has not fully resolved within the stall window
    #[error("Lookup for {index} stalled after {waited_ms}ms (missing: {missing:?})")]
    StalledLookup {
        index: KittyIndex,
        missing: Vec<Field>,
        waited_ms: u64,
    },

    /// Configuration rejected
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// A write command could not be dispatched
    #[error("Dispatch failed for {command}: {reason}")]
    Dispatch { command: String, reason: String },

    /// The pipeline task is no longer running
    #[error("Pipeline closed")]
    PipelineClosed,
}

impl KittiesError {
    /// Wrap a store error coming from `source`.
    pub fn subscription(source: SubscriptionSource, error: &StoreError) -> Self {
        Self::SubscriptionFailure {
            source_kind: source,
            reason: error.to_string(),
        }
    }

    /// A subscription stream ended without an error.
    pub fn subscription_closed(source: SubscriptionSource) -> Self {
        Self::SubscriptionFailure {
            source_kind: source,
            reason: "stream ended".to_string(),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying or waiting may clear the condition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionFailure { .. }
                | Self::InconsistentCount { .. }
                | Self::StalledLookup { .. }
        )
    }

    /// Suggested UI severity.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InconsistentCount { .. } => ErrorSeverity::Info,
            Self::SubscriptionFailure { .. } | Self::StalledLookup { .. } => ErrorSeverity::Warning,
            Self::Config { .. } | Self::Dispatch { .. } | Self::PipelineClosed => {
                ErrorSeverity::Error
            }
        }
    }
}

/// Result alias for pipeline operations.
pub type KittiesResult<T> = Result<T, KittiesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_failure_message() {
        let err = KittiesError::subscription(
            SubscriptionSource::Lookup {
                index: KittyIndex(2),
                field: Field::Dna,
            },
            &StoreError::disconnected("socket closed"),
        );
        assert_eq!(
            err.to_string(),
            "Subscription failure on dna lookup #2: Remote store disconnected: socket closed"
        );
        assert!(err.is_transient());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_classification() {
        let regress = KittiesError::InconsistentCount {
            observed: 1,
            high_water: 3,
        };
        assert!(regress.is_transient());
        assert_eq!(regress.severity(), ErrorSeverity::Info);

        let config = KittiesError::config("max_batch_size must be positive");
        assert!(!config.is_transient());
        assert_eq!(config.severity(), ErrorSeverity::Error);
    }
}
