//! # Supervised background loop.
//!
//! An [`Agent`] owns one spawned loop that repeatedly invokes a
//! [`Worker::step`]. Transient errors never kill the loop: they are logged
//! at error and the loop continues. The loop ends on [`Step::Stop`],
//! cancellation, or [`Error::Canceled`] bubbling out of a step.
//!
//! Agents are created **not started**: the loop parks on an internal latch
//! until [`Agent::start`] releases it, so composite structures can finish
//! wiring their parts before anything runs.
//!
//! Workers that consume an inbound queue own the [`Inbox`](crate::Inbox)
//! end of an [`inbox`](crate::inbox) channel; producers keep the
//! [`InboxSender`](crate::InboxSender), whose `send` fails with
//! [`Error::QueueRefused`] once the reader is gone.
//!
//! ## Loop
//! ```text
//! wait for start (or cancellation)
//! loop {
//!   ├─► cancelled?            → exit
//!   ├─► worker.step(token)
//!   │     ├─► Ok(Continue)    → loop
//!   │     ├─► Ok(Stop)        → exit
//!   │     ├─► Err(Canceled)   → exit (cooperative shutdown)
//!   │     └─► Err(e)          → log error, loop
//! }
//! done latch set (also on panic, via drop guard)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::sync::ManualResetSignal;

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the next iteration.
    Continue,
    /// End the loop normally.
    Stop,
}

/// One iteration of a supervised loop.
///
/// `step` takes `&mut self`: a worker owns its loop state (an inbox
/// receiver, counters) and is driven by exactly one agent.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Stable name used in log lines.
    fn name(&self) -> &str;

    /// Runs one iteration. Returning [`Error::Canceled`] ends the loop
    /// quietly; any other error is logged and the loop continues.
    async fn step(&mut self, token: &CancellationToken) -> Result<Step, Error>;
}

/// Handle to a supervised loop.
pub struct Agent {
    name: String,
    token: CancellationToken,
    gate: Arc<ManualResetSignal>,
    done: Arc<ManualResetSignal>,
}

/// Sets the done latch even if the worker panics mid-step.
struct DoneOnDrop(Arc<ManualResetSignal>);

impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.set();
    }
}

impl Agent {
    /// Spawns the loop for `worker`, parked until [`start`](Self::start).
    ///
    /// `token` bounds the loop; cancelling it ends the loop after the
    /// current step.
    pub fn new<W: Worker>(mut worker: W, token: CancellationToken) -> Self {
        let gate = Arc::new(ManualResetSignal::new());
        let done = Arc::new(ManualResetSignal::new());
        let name = worker.name().to_string();

        {
            let gate = gate.clone();
            let done = done.clone();
            let token = token.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let _done = DoneOnDrop(done);
                tokio::select! {
                    _ = gate.wait() => {}
                    _ = token.cancelled() => return,
                }
                debug!("[agent] started name={name}");
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    match worker.step(&token).await {
                        Ok(Step::Continue) => continue,
                        Ok(Step::Stop) => break,
                        Err(Error::Canceled) => break,
                        Err(e) => {
                            error!("[agent] step failed name={name} err={e} label={}", e.as_label());
                            continue;
                        }
                    }
                }
                debug!("[agent] stopped name={name}");
            });
        }

        Self {
            name,
            token,
            gate,
            done,
        }
    }

    /// Returns the agent's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the loop. Idempotent.
    pub fn start(&self) {
        self.gate.set();
    }

    /// Completes when the loop has exited.
    pub async fn done(&self) {
        self.done.wait().await;
    }

    /// Signals cancellation and awaits loop exit. Idempotent.
    pub async fn dispose(&self) {
        self.token.cancel();
        self.done.wait().await;
    }
}
