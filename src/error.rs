//! # Error type shared across the batchvisor components.
//!
//! A single [`Error`] enum covers every failure the crate surfaces:
//!
//! - [`Error::MissingResponse`] a batch call returned no response for a request's key.
//! - [`Error::Fail`] a user-supplied batch operation or handler failed.
//! - [`Error::Canceled`] a suspension point observed cancellation.
//! - [`Error::Disposed`] the component no longer accepts work.
//! - [`Error::QueueRefused`] an agent inbox rejected an item.
//!
//! The enum is `Clone` on purpose: when a whole batch call fails, the same
//! cause is handed to every request that was coalesced into that batch.

use thiserror::Error;

/// Errors produced by batchvisor components and user callbacks.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The batch operation returned no response matching the request's key.
    #[error("no response for key {key} in batch result")]
    MissingResponse {
        /// Debug rendering of the request key that went unanswered.
        key: String,
    },

    /// A user-supplied operation failed.
    #[error("operation failed: {reason}")]
    Fail {
        /// Human-readable failure cause.
        reason: String,
    },

    /// A merged cancellation token was cancelled at a suspension point.
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional termination.
    #[error("operation canceled")]
    Canceled,

    /// The component has been disposed and no longer accepts requests.
    #[error("component disposed")]
    Disposed,

    /// The inbound queue refused the item (reader side is gone).
    #[error("inbound queue refused the item")]
    QueueRefused,
}

impl Error {
    /// Builds a [`Error::Fail`] from any displayable cause.
    pub fn fail(reason: impl Into<String>) -> Self {
        Error::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::MissingResponse { .. } => "missing_response",
            Error::Fail { .. } => "operation_failed",
            Error::Canceled => "canceled",
            Error::Disposed => "disposed",
            Error::QueueRefused => "queue_refused",
        }
    }

    /// Indicates whether the error marks cooperative termination rather
    /// than a real failure (cancellation or disposal).
    pub fn is_termination(&self) -> bool {
        matches!(self, Error::Canceled | Error::Disposed)
    }
}
