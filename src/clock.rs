//! # Injectable time source.
//!
//! [`Clock`] abstracts "now" and a cancellable sleep so that every
//! time-dependent loop in the crate (batch delay windows, touch intervals,
//! retry pauses) goes through one seam.
//!
//! The default implementation, [`TokioClock`], delegates to [`tokio::time`].
//! Under a paused test runtime (`#[tokio::test(start_paused = true)]`) the
//! tokio clock auto-advances, which makes every delay in the crate
//! deterministic without a mock.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Abstract source of time: a monotonic "now" and a cancellable delay.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Completes after `dur` has elapsed, or fails with [`Error::Canceled`]
    /// as soon as `token` is cancelled.
    async fn delay(&self, dur: Duration, token: &CancellationToken) -> Result<(), Error>;
}

/// Production clock backed by [`tokio::time`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay(&self, dur: Duration, token: &CancellationToken) -> Result<(), Error> {
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => Ok(()),
            _ = token.cancelled() => Err(Error::Canceled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delay_completes_after_duration() {
        let clock = TokioClock;
        let token = CancellationToken::new();
        let started = clock.now();

        clock
            .delay(Duration::from_secs(3), &token)
            .await
            .expect("delay should complete");

        assert!(clock.now() - started >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_fails_on_cancellation() {
        let clock = TokioClock;
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let res = clock.delay(Duration::from_secs(3600), &token).await;
        assert_eq!(res, Err(Error::Canceled));
    }

    #[tokio::test]
    async fn delay_on_cancelled_token_is_immediate() {
        let clock = TokioClock;
        let token = CancellationToken::new();
        token.cancel();

        let res = clock.delay(Duration::from_secs(3600), &token).await;
        assert_eq!(res, Err(Error::Canceled));
    }
}
