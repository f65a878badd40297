//! Pipeline configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! snapshot_policy = "placeholder"
//! batch_window_ms = 5
//! stall_timeout_ms = 30000
//! ```

use kitties_core::{KittiesError, KittiesResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the reconciler treats indices that have not fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Leave incomplete indices out; later complete indices still appear
    #[default]
    Omit,
    /// Stop at the first incomplete index
    ContiguousPrefix,
    /// Emit an explicit pending entry for each incomplete index
    Placeholder,
}

/// Configuration for the live-list pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Treatment of incomplete indices (default: omit)
    pub snapshot_policy: SnapshotPolicy,
    /// Extra wait after the first event of a turn before reconciling
    /// (default: 0, reconcile as soon as ready events are drained)
    pub batch_window_ms: u64,
    /// Events applied in one turn before a flush is forced (default: 1000)
    pub max_batch_size: usize,
    /// Report indices that are still incomplete after this long (default: off)
    pub stall_timeout_ms: Option<u64>,
    /// Release every remote subscription when the last listener leaves
    /// (default: true)
    pub release_when_idle: bool,
    /// Buffered errors per error subscriber (default: 64)
    pub error_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_policy: SnapshotPolicy::Omit,
            batch_window_ms: 0,
            max_batch_size: 1000,
            stall_timeout_ms: None,
            release_when_idle: true,
            error_channel_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> KittiesResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| KittiesError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> KittiesResult<()> {
        if self.max_batch_size == 0 {
            return Err(KittiesError::config("max_batch_size must be at least 1"));
        }
        if self.error_channel_capacity == 0 {
            return Err(KittiesError::config(
                "error_channel_capacity must be at least 1",
            ));
        }
        if self.stall_timeout_ms == Some(0) {
            return Err(KittiesError::config(
                "stall_timeout_ms must be positive when set",
            ));
        }
        Ok(())
    }

    /// Set the snapshot policy.
    pub fn with_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Enable stall reporting.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Batching window as a duration.
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Stall timeout as a duration.
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }
}
