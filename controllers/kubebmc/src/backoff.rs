//! # Exponential Backoff
//!
//! Requeue delays for keys whose reconciliation failed with a retryable error.
//! The delay doubles with every consecutive failure of the same key and is
//! capped, so a declaration stuck behind a broken API server is retried at a
//! steady interval rather than dropped.
//!
//! Sequence with the defaults (1s base, 300s max): 1s, 2s, 4s, 8s, ... 256s, 300s.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Stateless: the caller tracks the failure count per key (the work queue
/// does) and asks for the delay that count maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    base: Duration,
    /// Cap for any single delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base delay and cap
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `failures` (1 = first failure).
    ///
    /// `failures == 0` returns zero. Overflowing intermediate values saturate
    /// to the cap.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures - 1;
        let factor = 2u32.checked_pow(exponent);
        factor
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
