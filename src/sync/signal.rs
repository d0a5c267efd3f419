//! # Awaitable manual-reset latch.
//!
//! [`ManualResetSignal`] is a level-triggered signal: once `set`, every
//! current and future wait observes it until someone calls `reset`.
//!
//! ## Rules
//! - State transitions are serialized under one internal mutex.
//! - Waiters are never resumed while that mutex is held: `set` flips the
//!   flag, releases the lock, then wakes.
//! - Waits register for a wakeup **before** re-checking the flag, so a
//!   concurrent `set` between check and park cannot be lost.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Awaitable latch with manual reset.
#[derive(Debug, Default)]
pub struct ManualResetSignal {
    set: Mutex<bool>,
    notify: Notify,
}

impl ManualResetSignal {
    /// Creates the signal in the non-set state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the signal with the given initial state.
    pub fn with_state(initially_set: bool) -> Self {
        Self {
            set: Mutex::new(initially_set),
            notify: Notify::new(),
        }
    }

    /// Returns whether the signal is currently set.
    pub fn is_set(&self) -> bool {
        *self.set.lock().expect("signal mutex poisoned")
    }

    /// Sets the signal; every current and future wait observes "set" until
    /// [`reset`](Self::reset).
    pub fn set(&self) {
        {
            let mut s = self.set.lock().expect("signal mutex poisoned");
            *s = true;
        }
        self.notify.notify_waiters();
    }

    /// Clears the signal. No effect if it was already non-set.
    pub fn reset(&self) {
        let mut s = self.set.lock().expect("signal mutex poisoned");
        *s = false;
    }

    /// Waits until the signal is set.
    ///
    /// Returns immediately when the signal is already set.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // A Notified only joins the waiter list once polled; enable()
            // registers it up front so a set() landing between the flag
            // check and the park cannot be lost.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Waits until the signal is set, the timeout elapses, or the token is
    /// cancelled.
    ///
    /// Returns `Ok(true)` when the set state was observed, `Ok(false)` on
    /// timeout, and [`Error::Canceled`] when `token` fired first.
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<bool, Error> {
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }
        tokio::select! {
            _ = token.cancelled() => Err(Error::Canceled),
            outcome = tokio::time::timeout(timeout, self.wait()) => Ok(outcome.is_ok()),
        }
    }
}
