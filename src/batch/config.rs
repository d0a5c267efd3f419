//! # Coalescer settings.

use std::time::Duration;

/// Settings for a [`BatchBuilder`](crate::BatchBuilder).
///
/// Values below their floor are silently clamped up at construction.
#[derive(Clone, Copy, Debug)]
pub struct BatchConfig {
    /// Maximum number of requests coalesced into one batch (`>= 1`).
    pub batch_size: usize,
    /// How long to keep a batch open for more requests after the first
    /// arrival (`0` dispatches as soon as the queue is drained).
    pub batch_delay: Duration,
    /// Maximum number of user batch calls in flight at once (`>= 1`).
    pub concurrency: usize,
}

impl Default for BatchConfig {
    /// Provides a default configuration:
    /// - `batch_size = 10`
    /// - `batch_delay = 0` (no accumulation window)
    /// - `concurrency = 1`
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::ZERO,
            concurrency: 1,
        }
    }
}

impl BatchConfig {
    /// Normalizes out-of-range values to their floor.
    pub fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.concurrency = self.concurrency.max(1);
        self
    }
}
