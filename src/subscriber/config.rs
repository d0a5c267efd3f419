//! # Subscriber settings.

use std::time::Duration;

use crate::keeper::KeeperConfig;
use crate::sync::SyncMode;

/// Floor for the subscriber's periodic intervals.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Settings for a [`BatchSubscriber`](crate::BatchSubscriber).
///
/// Values below their floor are silently clamped up at construction.
#[derive(Clone, Copy, Debug)]
pub struct SubscriberConfig {
    /// Maximum messages handled concurrently (`>= 1`).
    pub handler_count: usize,
    /// Maximum touch/delete batches of one kind in flight (`>= 1`).
    pub batch_concurrency: usize,
    /// How many consecutive touch/delete failures are retried.
    pub retry_limit: u32,
    /// Pause before retrying a failed touch or delete (`>= 10ms`).
    pub retry_interval: Duration,
    /// Maximum receipts per delete batch (`>= 1`).
    pub delete_batch_size: usize,
    /// Maximum receipts per touch batch (`>= 1`).
    pub touch_batch_size: usize,
    /// Pause between successful touches of one receipt (`>= 10ms`).
    pub touch_interval: Duration,
    /// Accumulation window for touch batches.
    pub touch_batch_delay: Duration,
    /// Alternate touch and delete batches instead of running them freely.
    pub alternate_batches: bool,
    /// Fire-and-forget deletes: higher throughput, deletes may race
    /// disposal. When false the handler fork awaits the delete.
    pub asynchronous_deletes: bool,
    /// Capacity of the internal message channel (`>= 1`); bounds how far
    /// polling runs ahead of handling.
    pub internal_queue_size: usize,
    /// Concurrent receive calls against the source (`>= 1`).
    pub poller_count: usize,
}

impl Default for SubscriberConfig {
    /// Provides a default configuration:
    /// - `handler_count = 10`, `poller_count = 1`, `internal_queue_size = 100`
    /// - `batch_concurrency = 2`, `alternate_batches = true`
    /// - `touch_interval = 1s`, `touch_batch_size = 10`, `touch_batch_delay = 0`
    /// - `delete_batch_size = 10`, `asynchronous_deletes = false`
    /// - `retry_limit = 3`, `retry_interval = 100ms`
    fn default() -> Self {
        Self {
            handler_count: 10,
            batch_concurrency: 2,
            retry_limit: 3,
            retry_interval: Duration::from_millis(100),
            delete_batch_size: 10,
            touch_batch_size: 10,
            touch_interval: Duration::from_secs(1),
            touch_batch_delay: Duration::ZERO,
            alternate_batches: true,
            asynchronous_deletes: false,
            internal_queue_size: 100,
            poller_count: 1,
        }
    }
}

impl SubscriberConfig {
    /// Normalizes out-of-range values to their floor.
    pub fn clamped(mut self) -> Self {
        self.handler_count = self.handler_count.max(1);
        self.batch_concurrency = self.batch_concurrency.max(1);
        self.retry_interval = self.retry_interval.max(MIN_INTERVAL);
        self.delete_batch_size = self.delete_batch_size.max(1);
        self.touch_batch_size = self.touch_batch_size.max(1);
        self.touch_interval = self.touch_interval.max(MIN_INTERVAL);
        self.internal_queue_size = self.internal_queue_size.max(1);
        self.poller_count = self.poller_count.max(1);
        self
    }

    /// Maps the receipt-upkeep subset onto a [`KeeperConfig`].
    pub(crate) fn to_keeper(self) -> KeeperConfig {
        KeeperConfig {
            touch_interval: self.touch_interval,
            touch_batch_size: self.touch_batch_size,
            touch_batch_delay: self.touch_batch_delay,
            delete_batch_size: self.delete_batch_size,
            retry_interval: self.retry_interval,
            retry_limit: self.retry_limit,
            concurrency: self.batch_concurrency,
            sync_mode: if self.alternate_batches {
                SyncMode::Alternating
            } else {
                SyncMode::Unrestricted
            },
            ..KeeperConfig::default()
        }
    }
}
