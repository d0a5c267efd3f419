//! # Inbound queue with windowed batch reads.
//!
//! [`inbox`] builds an unbounded MPSC channel split into an [`InboxSender`]
//! (cloneable producer handle) and an [`Inbox`] (the single reader, owned by
//! an agent worker).
//!
//! [`Inbox::read_many`] is the coalescing read: it blocks for the first
//! item, drains whatever is already queued, and then — if the batch is still
//! short — keeps the window open for a bounded time measured from the first
//! arrival.
//!
//! ## Rules
//! - An empty result means "closed and drained"; it is never returned while
//!   the channel is alive.
//! - Cancellation of the supplied token fails the read with
//!   [`Error::Canceled`]; already-collected items stay in the local buffer
//!   and are lost with it (callers treat cancellation as teardown).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::Error;

/// Creates an inbound queue, returning the producer and reader halves.
pub fn inbox<M: Send>() -> (InboxSender<M>, Inbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboxSender { tx }, Inbox { rx })
}

/// Cloneable producer handle for an [`Inbox`].
#[derive(Debug)]
pub struct InboxSender<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for InboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send> InboxSender<M> {
    /// Enqueues an item.
    ///
    /// Fails with [`Error::QueueRefused`] once the reader half is gone.
    pub fn send(&self, item: M) -> Result<(), Error> {
        self.tx.send(item).map_err(|_| Error::QueueRefused)
    }
}

/// Reader half of an inbound queue. Single-reader discipline: the inbox is
/// owned by exactly one loop.
#[derive(Debug)]
pub struct Inbox<M> {
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M: Send> Inbox<M> {
    /// Receives one item; `None` when the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Reads up to `max` items.
    ///
    /// Blocks until at least one item is available (or the queue closes).
    /// If the first arrival leaves the batch short of `max` and `window` is
    /// non-zero, keeps draining until `max` items have been collected or
    /// `window` has elapsed since the first arrival, whichever comes first.
    pub async fn read_many(
        &mut self,
        max: usize,
        window: Duration,
        clock: &Arc<dyn Clock>,
        token: &CancellationToken,
    ) -> Result<Vec<M>, Error> {
        debug_assert!(max >= 1);

        let first = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            item = self.rx.recv() => item,
        };
        let Some(first) = first else {
            return Ok(Vec::new());
        };

        let opened = clock.now();
        let mut items = Vec::with_capacity(max.min(64));
        items.push(first);

        while items.len() < max {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        if items.len() >= max || window.is_zero() {
            return Ok(items);
        }

        loop {
            let elapsed = clock.now().saturating_duration_since(opened);
            let Some(remaining) = window.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
                return Ok(items);
            };
            tokio::select! {
                res = clock.delay(remaining, token) => {
                    res?;
                    return Ok(items);
                }
                item = self.rx.recv() => {
                    let Some(item) = item else {
                        return Ok(items);
                    };
                    items.push(item);
                    if items.len() >= max {
                        return Ok(items);
                    }
                }
            }
        }
    }
}
