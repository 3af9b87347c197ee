//! Engine-wide tunables.
//!
//! Distilled from the per-channel constants a playout pipeline needs: ring
//! sizing, readiness, priming deadlines and backoff. Grouped into one
//! serializable struct so a host process can load it from its own
//! configuration file, following the same `validate()`-returns-`String`
//! convention the rest of the host project uses for its own config types.

use serde::{Deserialize, Serialize};

/// Tunables shared by every channel started through one
/// [`crate::engine::PlayoutEngine`] instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring buffer capacity per slot. Must be a non-zero power of two.
    pub ring_capacity: usize,
    /// Minimum frames a slot's decoder must have produced before the slot
    /// is considered past priming (`SlotStatus::Streaming`).
    pub ready_threshold: usize,
    /// Upper bound on how long priming may take before a lifecycle call
    /// that depends on it fails with [`crate::error::EngineError::Timeout`].
    pub priming_timeout_ms: u64,
    /// Backoff applied by a producer after `RingFull` or a transient decode error.
    pub min_backoff_ms: u64,
    /// Poll interval used by a consumer when its ring is empty.
    pub consumer_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 128,
            ready_threshold: 4,
            priming_timeout_ms: 2_000,
            min_backoff_ms: 10,
            consumer_poll_interval_ms: 5,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration. Returns a human-readable message on the
    /// first violated invariant, mirroring the host project's
    /// `StreamingConfig::validate` pattern.
    pub fn validate(&self) -> Result<(), String> {
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err("ring_capacity must be a non-zero power of two".to_string());
        }
        if self.ready_threshold == 0 {
            return Err("ready_threshold must be >= 1".to_string());
        }
        if self.ready_threshold >= self.ring_capacity {
            return Err("ready_threshold must be < ring_capacity".to_string());
        }
        if self.priming_timeout_ms == 0 {
            return Err("priming_timeout_ms must be >= 1".to_string());
        }
        if self.consumer_poll_interval_ms == 0 {
            return Err("consumer_poll_interval_ms must be >= 1".to_string());
        }
        Ok(())
    }
}
