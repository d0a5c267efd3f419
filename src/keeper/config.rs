//! # Keeper settings.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::sync::SyncMode;

/// Settings for an [`AliveKeeper`](crate::AliveKeeper).
///
/// Values below their floor are silently clamped up at construction.
#[derive(Clone, Copy, Debug)]
pub struct KeeperConfig {
    /// Pause between successful touches of one item.
    pub touch_interval: Duration,
    /// Maximum number of items coalesced into one touch batch (`>= 1`).
    pub touch_batch_size: usize,
    /// Accumulation window for touch batches.
    pub touch_batch_delay: Duration,
    /// Maximum number of items coalesced into one delete batch (`>= 1`).
    pub delete_batch_size: usize,
    /// Pause before retrying a failed touch or delete.
    pub retry_interval: Duration,
    /// How many consecutive failures are retried before giving up.
    pub retry_limit: u32,
    /// Maximum batches of one kind in flight at once (`>= 1`).
    pub concurrency: usize,
    /// Interleaving between touch and delete batches.
    pub sync_mode: SyncMode,
    /// Pacing of the registry poll during shutdown.
    pub shutdown_backoff: BackoffPolicy,
}

impl Default for KeeperConfig {
    /// Provides a default configuration:
    /// - `touch_interval = 1s`
    /// - `touch_batch_size = 10`, `touch_batch_delay = 0`
    /// - `delete_batch_size = 10`
    /// - `retry_interval = 100ms`, `retry_limit = 3`
    /// - `concurrency = 1`, `sync_mode = Safe`
    /// - `shutdown_backoff = 10ms doubling up to 1s`
    fn default() -> Self {
        Self {
            touch_interval: Duration::from_secs(1),
            touch_batch_size: 10,
            touch_batch_delay: Duration::ZERO,
            delete_batch_size: 10,
            retry_interval: Duration::from_millis(100),
            retry_limit: 3,
            concurrency: 1,
            sync_mode: SyncMode::Safe,
            shutdown_backoff: BackoffPolicy::drain(),
        }
    }
}

impl KeeperConfig {
    /// Normalizes out-of-range values to their floor.
    pub fn clamped(mut self) -> Self {
        self.touch_batch_size = self.touch_batch_size.max(1);
        self.delete_batch_size = self.delete_batch_size.max(1);
        self.concurrency = self.concurrency.max(1);
        self
    }
}
