//! # Poll / handle / ack pipeline.
//!
//! [`BatchSubscriber`] drives a [`Poller`]: it pulls message batches,
//! registers every receipt with an [`AliveKeeper`], hands messages to a
//! bounded handler pool, and deletes receipts on success.
//!
//! ## Topology
//! ```text
//! poller loop (Agent) ── gate(poller_count) ── fork: receive
//!        │                                       ├─ keeper.register(receipt)
//!        │                                       └─ burrito ──► bounded channel
//!        ▼                                                        │
//! runner loop (Agent) ◄───────────────────────────────────────────┘
//!        │ gate(handler_count) ── fork: handler.handle(message)
//!        │                          ├─ Ok  → keeper.delete(receipt)
//!        │                          └─ Err → log + keeper.forget(receipt)
//!        ▼
//! supervisor loop (Agent): waits for the bounding token, runs the ordered
//! teardown.
//! ```
//!
//! ## Shutdown order
//! Stop the poller first (cancel + join its forks), close the internal
//! channel, let the runner drain, join the handler forks, then dispose the
//! keeper (which waits for every touch loop to end).
//!
//! ## Rules
//! - The bounded channel is the back-pressure seam: a full channel blocks
//!   the poll forks, which blocks further polling of the source.
//! - Message order across handlers is not preserved.
//! - A handler failure forgets the receipt; the claim expires at the source
//!   and the message is redelivered (at-least-once).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agent::{Agent, Step, Worker};
use crate::clock::{Clock, TokioClock};
use crate::error::Error;
use crate::keeper::{AliveKeeper, LeaseOps};
use crate::subscriber::{Handler, Poller, SubscriberConfig};
use crate::sync::ManualResetSignal;

/// A message and the receipt claiming it, in flight between the poller and
/// the handler pool.
struct Burrito<M, R> {
    message: M,
    receipt: R,
}

/// Lends a poller's touch/delete/identity to the keeper.
struct PollerLeases<P: Poller> {
    poller: Arc<P>,
}

#[async_trait]
impl<P: Poller> LeaseOps for PollerLeases<P> {
    type Item = P::Receipt;

    async fn touch(
        &self,
        items: Vec<Self::Item>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Item>, Error> {
        self.poller.touch(items, token).await
    }

    async fn delete(
        &self,
        items: Vec<Self::Item>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Item>, Error> {
        self.poller.delete(items, token).await
    }

    fn identity(&self, item: &Self::Item) -> String {
        self.poller.identity_of(item)
    }
}

struct Inner<P: Poller> {
    keeper: AliveKeeper<PollerLeases<P>>,
    poller_agent: Agent,
    runner_agent: Agent,
    poll_token: CancellationToken,
    poll_tracker: TaskTracker,
    run_tracker: TaskTracker,
    tx: StdMutex<Option<mpsc::Sender<Burrito<P::Message, P::Receipt>>>>,
    disposing: AtomicBool,
    done: ManualResetSignal,
}

impl<P: Poller> Inner<P> {
    /// Ordered teardown; safe to race, later callers wait for the first.
    async fn teardown(&self) {
        if self.disposing.swap(true, Ordering::SeqCst) {
            self.done.wait().await;
            return;
        }
        debug!("[subscriber] teardown started");

        // Poller first: no new claims are taken while we drain.
        self.poll_token.cancel();
        self.poller_agent.start();
        self.poller_agent.done().await;
        self.poll_tracker.close();
        self.poll_tracker.wait().await;

        // Closing the channel lets the runner drain what was buffered.
        {
            let mut tx = self.tx.lock().expect("subscriber mutex poisoned");
            tx.take();
        }
        self.runner_agent.start();
        self.runner_agent.done().await;
        self.run_tracker.close();
        self.run_tracker.wait().await;

        // The keeper waits for every touch loop to end.
        self.keeper.dispose().await;
        self.done.set();
        debug!("[subscriber] teardown finished");
    }
}

/// Message pump over a [`Poller`], built from a supervisor and two
/// sub-loops. Created **not started**; call [`start`](Self::start).
pub struct BatchSubscriber<P: Poller> {
    inner: Arc<Inner<P>>,
    supervisor: Agent,
}

impl<P: Poller> BatchSubscriber<P> {
    /// Creates the pipeline over `poller` and `handler`, bounded by `token`,
    /// using the tokio clock.
    pub fn new<H>(poller: P, handler: H, config: SubscriberConfig, token: CancellationToken) -> Self
    where
        H: Handler<P::Message>,
    {
        Self::with_clock(poller, handler, config, token, Arc::new(TokioClock))
    }

    /// Same as [`new`](Self::new) with an injected [`Clock`].
    pub fn with_clock<H>(
        poller: P,
        handler: H,
        config: SubscriberConfig,
        token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        H: Handler<P::Message>,
    {
        let config = config.clamped();
        let poller = Arc::new(poller);
        let root = token;
        let poll_token = root.child_token();

        let keeper = AliveKeeper::with_clock(
            config.to_keeper(),
            PollerLeases {
                poller: poller.clone(),
            },
            clock,
        );

        let (tx, rx) = mpsc::channel(config.internal_queue_size);
        let poll_tracker = TaskTracker::new();
        let run_tracker = TaskTracker::new();

        let poller_agent = Agent::new(
            PollWorker {
                poller: poller.clone(),
                keeper: keeper.clone(),
                gate: Arc::new(Semaphore::new(config.poller_count)),
                tracker: poll_tracker.clone(),
                tx: tx.clone(),
            },
            poll_token.clone(),
        );

        let runner_agent = Agent::new(
            RunWorker {
                rx,
                poller,
                handler: Arc::new(handler),
                keeper: keeper.clone(),
                gate: Arc::new(Semaphore::new(config.handler_count)),
                tracker: run_tracker.clone(),
                root: root.clone(),
                asynchronous_deletes: config.asynchronous_deletes,
            },
            CancellationToken::new(),
        );

        let inner = Arc::new(Inner {
            keeper,
            poller_agent,
            runner_agent,
            poll_token,
            poll_tracker,
            run_tracker,
            tx: StdMutex::new(Some(tx)),
            disposing: AtomicBool::new(false),
            done: ManualResetSignal::new(),
        });

        // The supervisor watches the bounding token from the moment of
        // construction; only the worker loops wait for start().
        let supervisor = Agent::new(
            SupervisorWorker {
                inner: inner.clone(),
                root,
            },
            CancellationToken::new(),
        );
        supervisor.start();

        Self { inner, supervisor }
    }

    /// Releases the poller and runner loops. Idempotent.
    pub fn start(&self) {
        self.inner.poller_agent.start();
        self.inner.runner_agent.start();
    }

    /// Completes once the pipeline has been torn down.
    pub async fn done(&self) {
        self.inner.done.wait().await;
    }

    /// Runs the ordered shutdown: poller, channel, runner, keeper.
    /// Idempotent.
    pub async fn dispose(&self) {
        self.inner.teardown().await;
        self.supervisor.dispose().await;
    }
}

/// Forks one receive-one-batch task per admission permit.
struct PollWorker<P: Poller> {
    poller: Arc<P>,
    keeper: AliveKeeper<PollerLeases<P>>,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    tx: mpsc::Sender<Burrito<P::Message, P::Receipt>>,
}

#[async_trait]
impl<P: Poller> Worker for PollWorker<P> {
    fn name(&self) -> &str {
        "subscriber/poller"
    }

    async fn step(&mut self, token: &CancellationToken) -> Result<Step, Error> {
        let permit = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            permit = self.gate.clone().acquire_owned() => {
                permit.expect("poll gate is never closed")
            }
        };

        let poller = self.poller.clone();
        let keeper = self.keeper.clone();
        let tx = self.tx.clone();
        let token = token.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            match poller.receive(&token).await {
                Ok(messages) => {
                    for message in messages {
                        let receipt = poller.receipt_of(&message);
                        keeper.register(receipt.clone(), None);
                        let delivered = tokio::select! {
                            res = tx.send(Burrito { message, receipt: receipt.clone() }) => {
                                res.is_ok()
                            }
                            _ = token.cancelled() => false,
                        };
                        if !delivered {
                            // Undeliverable mid-teardown: stop keeping the
                            // claim alive and let it expire at the source.
                            keeper.forget(&receipt);
                        }
                    }
                }
                Err(e) if e.is_termination() => {}
                Err(e) => error!("[subscriber] receive failed err={e} label={}", e.as_label()),
            }
        });
        Ok(Step::Continue)
    }
}

/// Pops burritos and forks their handling under the handler gate.
struct RunWorker<P: Poller, H: Handler<P::Message>> {
    rx: mpsc::Receiver<Burrito<P::Message, P::Receipt>>,
    poller: Arc<P>,
    handler: Arc<H>,
    keeper: AliveKeeper<PollerLeases<P>>,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    root: CancellationToken,
    asynchronous_deletes: bool,
}

#[async_trait]
impl<P: Poller, H: Handler<P::Message>> Worker for RunWorker<P, H> {
    fn name(&self) -> &str {
        "subscriber/runner"
    }

    async fn step(&mut self, _token: &CancellationToken) -> Result<Step, Error> {
        // Drains past cancellation on purpose: the channel closing is what
        // ends this loop, so buffered messages are always either handled or
        // forgotten.
        let Some(burrito) = self.rx.recv().await else {
            return Ok(Step::Stop);
        };
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .expect("handler gate is never closed");

        let poller = self.poller.clone();
        let handler = self.handler.clone();
        let keeper = self.keeper.clone();
        let handler_token = self.root.child_token();
        let asynchronous_deletes = self.asynchronous_deletes;
        self.tracker.spawn(async move {
            let _permit = permit;
            let Burrito { message, receipt } = burrito;
            match handler.handle(message, handler_token).await {
                Ok(()) => {
                    if asynchronous_deletes {
                        let keeper = keeper.clone();
                        let receipt = receipt.clone();
                        tokio::spawn(async move {
                            let _ = keeper.delete(receipt, None).await;
                        });
                    } else if let Err(e) = keeper.delete(receipt.clone(), None).await {
                        if !e.is_termination() {
                            warn!(
                                "[subscriber] delete failed receipt={} err={e}",
                                poller.identity_of(&receipt)
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "[subscriber] handler failed receipt={} err={e} label={}",
                        poller.identity_of(&receipt),
                        e.as_label()
                    );
                    keeper.forget(&receipt);
                }
            }
        });
        Ok(Step::Continue)
    }
}

/// Watches the bounding token and runs the teardown when it fires.
struct SupervisorWorker<P: Poller> {
    inner: Arc<Inner<P>>,
    root: CancellationToken,
}

#[async_trait]
impl<P: Poller> Worker for SupervisorWorker<P> {
    fn name(&self) -> &str {
        "subscriber/supervisor"
    }

    async fn step(&mut self, token: &CancellationToken) -> Result<Step, Error> {
        tokio::select! {
            _ = self.root.cancelled() => {
                self.inner.teardown().await;
                Ok(Step::Stop)
            }
            _ = token.cancelled() => Err(Error::Canceled),
        }
    }
}
