//! # Message handler seam.
//!
//! [`Handler`] is the unit of work the subscriber runs per message;
//! [`HandlerFn`] wraps a closure so simple handlers need no struct.
//!
//! A handler failure never terminates the subscriber: it is logged and the
//! message's receipt is forgotten, so the claim expires at the source and
//! the message is redelivered.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Processes one message under a token tied to the subscriber's lifetime.
#[async_trait]
pub trait Handler<M: Send + 'static>: Send + Sync + 'static {
    /// Handles one message. Implementations should check the token at their
    /// own suspension points and bail out with [`Error::Canceled`].
    async fn handle(&self, message: M, token: CancellationToken) -> Result<(), Error>;
}

/// Function-backed handler implementation.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps a closure as a [`Handler`].
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<M, F, Fut> Handler<M> for HandlerFn<F>
where
    M: Send + 'static,
    F: Fn(M, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn handle(&self, message: M, token: CancellationToken) -> Result<(), Error> {
        (self.f)(message, token).await
    }
}
