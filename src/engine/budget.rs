//! Timeout budgets derived from input size.
//!
//! Engines give no explicit ETA up front, so the budget scales with the
//! payload and is clamped on both ends. The constants are tunables, not
//! measured values; only the shape matters (larger input, larger budget).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`BudgetCalculator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Megabytes of payload assumed per minute of media
    pub mb_per_media_minute: f64,
    /// Processing minutes per media minute
    pub processing_ratio: f64,
    /// Lower bound on the processing time, minutes
    pub min_processing_minutes: f64,
    /// Upper bound on the total timeout, minutes
    pub max_timeout_minutes: f64,
    /// Applied to an engine-reported estimate
    pub estimate_multiplier: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            mb_per_media_minute: 2.0,
            processing_ratio: 1.0,
            min_processing_minutes: 10.0,
            max_timeout_minutes: 360.0,
            estimate_multiplier: 2.0,
        }
    }
}

/// Timeout ceiling plus polling-attempt ceiling for one transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub timeout: Duration,
    /// One attempt per second of timeout
    pub max_poll_attempts: u32,
}

impl TimeoutBudget {
    fn from_minutes(minutes: f64) -> Self {
        let secs = (minutes * 60.0).round().max(1.0) as u64;
        Self {
            timeout: Duration::from_secs(secs),
            max_poll_attempts: u32::try_from(secs).unwrap_or(u32::MAX),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BudgetCalculator {
    config: BudgetConfig,
}

impl BudgetCalculator {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Estimated media duration in minutes, at least one.
    pub fn estimated_media_minutes(&self, size_bytes: u64) -> f64 {
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
        (size_mb / self.config.mb_per_media_minute).max(1.0)
    }

    /// Budget for a payload of `size_bytes`.
    pub fn budget(&self, size_bytes: u64) -> TimeoutBudget {
        let media = self.estimated_media_minutes(size_bytes);
        let processing = (media * self.config.processing_ratio)
            .max(self.config.min_processing_minutes)
            .min(self.config.max_timeout_minutes);
        TimeoutBudget::from_minutes(processing)
    }

    /// Widen `base` once the engine reports its own estimate.
    ///
    /// Never shrinks the size-derived budget; still clamped to the ceiling.
    pub fn with_estimate(&self, base: TimeoutBudget, estimate_minutes: f64) -> TimeoutBudget {
        if !estimate_minutes.is_finite() || estimate_minutes <= 0.0 {
            return base;
        }
        let from_estimate = (estimate_minutes * self.config.estimate_multiplier)
            .min(self.config.max_timeout_minutes);
        let widened = TimeoutBudget::from_minutes(from_estimate);
        if widened.timeout > base.timeout {
            widened
        } else {
            base
        }
    }
}
