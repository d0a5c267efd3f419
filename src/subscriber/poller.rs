//! # Upstream source contract.
//!
//! A [`Poller`] is the subscriber's view of the external queue system:
//! receive message batches, and touch/delete the receipts that claim them.
//!
//! ## Rules
//! - `receive` may return an empty batch and may block until messages
//!   appear; it must honor cancellation.
//! - `delete` and `touch` return the successfully-processed subset and may
//!   fail as a whole to indicate a whole-batch failure.
//! - `receipt_of` is pure; `identity_of` is stable for the life of the
//!   receipt and is used in log lines.

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// External source of messages with lease-based receipts.
#[async_trait]
pub trait Poller: Send + Sync + 'static {
    /// A message pulled from the source.
    type Message: Send + 'static;
    /// The transient ownership handle for a message.
    type Receipt: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// Extracts the receipt claiming `message`.
    fn receipt_of(&self, message: &Self::Message) -> Self::Receipt;

    /// Stable identity of a receipt, for log lines.
    fn identity_of(&self, receipt: &Self::Receipt) -> String;

    /// Pulls the next batch of messages.
    async fn receive(&self, token: &CancellationToken) -> Result<Vec<Self::Message>, Error>;

    /// Releases the claim on every receipt; returns the deleted subset.
    async fn delete(
        &self,
        receipts: Vec<Self::Receipt>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Receipt>, Error>;

    /// Renews the claim on every receipt; returns the renewed subset.
    async fn touch(
        &self,
        receipts: Vec<Self::Receipt>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Receipt>, Error>;
}
