//! Coordinator configuration and its validation errors.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rejected coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DedupConfigError {
    #[error("{field} must be greater than 0")]
    MustBePositive { field: &'static str },
}

/// Tuning knobs for the coordinator.
///
/// All fields are defaulted so a partial `[dedup]` TOML section or a handful
/// of `COALESCE__DEDUP__*` env vars is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Validity window of cached successful results in milliseconds (default: 5000)
    pub ttl_ms: u64,
    /// Hash structured descriptors to 64-char SHA-256 keys instead of using the
    /// canonical JSON directly (default: true)
    pub enable_hashing: bool,
    /// Cap on distinct keys executing at once (default: 1000)
    pub max_pending: usize,
    /// Member count that seals a batch immediately (default: 10)
    pub batch_size: usize,
    /// Milliseconds after a batch opens before it is sealed regardless of size (default: 100)
    pub batch_delay_ms: u64,
    /// Interval between expiry sweeps in milliseconds (default: 10000)
    pub sweep_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            enable_hashing: true,
            max_pending: 1_000,
            batch_size: 10,
            batch_delay_ms: 100,
            sweep_interval_ms: 10_000,
        }
    }
}

impl DedupConfig {
    /// # Errors
    ///
    /// Returns [`DedupConfigError::MustBePositive`] for a zero `ttl_ms`,
    /// `max_pending`, `batch_size` or `sweep_interval_ms`. A zero
    /// `batch_delay_ms` is allowed and seals partial batches on the next tick.
    pub fn validate(&self) -> Result<(), DedupConfigError> {
        if self.ttl_ms == 0 {
            return Err(DedupConfigError::MustBePositive { field: "ttl_ms" });
        }
        if self.max_pending == 0 {
            return Err(DedupConfigError::MustBePositive { field: "max_pending" });
        }
        if self.batch_size == 0 {
            return Err(DedupConfigError::MustBePositive { field: "batch_size" });
        }
        if self.sweep_interval_ms == 0 {
            return Err(DedupConfigError::MustBePositive { field: "sweep_interval_ms" });
        }
        Ok(())
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
