//! # Request coalescer with key-based demultiplexing.
//!
//! [`BatchBuilder`] turns many concurrent single-item requests into
//! bounded-size batched calls to one user operation and routes the
//! responses back to the individual callers.
//!
//! ## Pipeline
//! ```text
//! request(req) ──► mailbox ──► inbox ──► reader loop (Agent)
//!                                           │ read_many(batch_size, batch_delay)
//!                                           │ acquire admission permit
//!                                           ▼
//!                                    dispatch fork (TaskTracker)
//!                                           │ dedup by request key
//!                                           │ run(representatives)
//!                                           ▼
//!                              resolve every mailbox exactly once
//! ```
//!
//! ## Rules
//! - The user operation never sees duplicate keys within one call; the
//!   input order is the first-arrival order of distinct keys.
//! - Requests sharing a key share the response (hence `Resp: Clone`).
//! - A key with waiters but no response fails those waiters with
//!   [`Error::MissingResponse`]; a failed batch call fails every waiter in
//!   the group with that cause; a response for an unknown key is ignored.
//! - The admission permit is taken **before** the dispatch is forked, so a
//!   burst beyond the concurrency bound keeps accumulating in the queue and
//!   coalesces into full batches.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agent::{Agent, Step, Worker};
use crate::batch::BatchConfig;
use crate::clock::{Clock, TokioClock};
use crate::error::Error;
use crate::sync::{inbox, Inbox, InboxSender};

type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;
type RunFn<Req, Resp> =
    Arc<dyn Fn(Vec<Req>, CancellationToken) -> BoxFuture<'static, Result<Vec<Resp>, Error>> + Send + Sync>;

/// A pending request: the request value and its single-assignment reply slot.
struct Mailbox<Req, Resp> {
    req: Req,
    reply: oneshot::Sender<Result<Resp, Error>>,
}

/// Request coalescer: concurrent `request` calls are grouped into batches
/// of at most `batch_size`, dispatched through an admission gate of
/// `concurrency`, and demultiplexed back by key.
pub struct BatchBuilder<Req, Resp, K> {
    name: String,
    tx: StdMutex<Option<InboxSender<Mailbox<Req, Resp>>>>,
    agent: Agent,
    tracker: TaskTracker,
    _key: PhantomData<fn() -> K>,
}

impl<Req, Resp, K> BatchBuilder<Req, Resp, K>
where
    Req: Send + 'static,
    Resp: Clone + Send + 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Creates a coalescer over the given key extractors and batch
    /// operation, using the tokio clock.
    pub fn new<KR, KS, F, Fut>(
        name: impl Into<String>,
        config: BatchConfig,
        key_of_req: KR,
        key_of_resp: KS,
        run: F,
    ) -> Self
    where
        KR: Fn(&Req) -> K + Send + Sync + 'static,
        KS: Fn(&Resp) -> K + Send + Sync + 'static,
        F: Fn(Vec<Req>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Resp>, Error>> + Send + 'static,
    {
        Self::with_clock(
            name,
            config,
            key_of_req,
            key_of_resp,
            run,
            Arc::new(TokioClock),
            CancellationToken::new(),
        )
    }

    /// Same as [`new`](Self::new) with an injected [`Clock`] and a bounding
    /// token.
    ///
    /// Cancelling `token` is the hard teardown: the reader stops without
    /// draining, pending requests fail with [`Error::Canceled`], and
    /// in-flight batch calls observe the cancellation through the token
    /// handed to the user operation. The graceful path is
    /// [`dispose`](Self::dispose).
    pub fn with_clock<KR, KS, F, Fut>(
        name: impl Into<String>,
        config: BatchConfig,
        key_of_req: KR,
        key_of_resp: KS,
        run: F,
        clock: Arc<dyn Clock>,
        token: CancellationToken,
    ) -> Self
    where
        KR: Fn(&Req) -> K + Send + Sync + 'static,
        KS: Fn(&Resp) -> K + Send + Sync + 'static,
        F: Fn(Vec<Req>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Resp>, Error>> + Send + 'static,
    {
        let name = name.into();
        let config = config.clamped();
        let (tx, rx) = inbox();
        let tracker = TaskTracker::new();

        let run: RunFn<Req, Resp> = Arc::new(move |batch, token| run(batch, token).boxed());

        let reader = Reader {
            name: format!("{name}/reader"),
            inbox: rx,
            config,
            clock,
            gate: Arc::new(Semaphore::new(config.concurrency)),
            tracker: tracker.clone(),
            key_of_req: Arc::new(key_of_req),
            key_of_resp: Arc::new(key_of_resp),
            run,
        };
        let agent = Agent::new(reader, token);
        agent.start();

        Self {
            name,
            tx: StdMutex::new(Some(tx)),
            agent,
            tracker,
            _key: PhantomData,
        }
    }

    /// Returns the coalescer's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a request and awaits the response whose key matches the
    /// request's key.
    ///
    /// Fails with [`Error::Disposed`] once [`dispose`](Self::dispose) has
    /// begun, [`Error::MissingResponse`] when the batch had no response for
    /// the key, or the batch call's own error on whole-batch failure.
    pub async fn request(&self, req: Req) -> Result<Resp, Error> {
        let sender = self
            .tx
            .lock()
            .expect("builder mutex poisoned")
            .as_ref()
            .cloned()
            .ok_or(Error::Disposed)?;

        let (reply, rx) = oneshot::channel();
        sender
            .send(Mailbox { req, reply })
            .map_err(|_| Error::Disposed)?;
        drop(sender);

        match rx.await {
            Ok(outcome) => outcome,
            // Reply slot dropped without resolution: the pipeline was torn
            // down around this mailbox.
            Err(_) => Err(Error::Canceled),
        }
    }

    /// Stops accepting new requests and drains buffered ones through the
    /// normal path, then waits for in-flight batches. Idempotent.
    pub async fn dispose(&self) {
        {
            let mut tx = self.tx.lock().expect("builder mutex poisoned");
            tx.take();
        }
        self.agent.done().await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Single reader loop: collects mailbox groups and forks their dispatch.
struct Reader<Req, Resp, K> {
    name: String,
    inbox: Inbox<Mailbox<Req, Resp>>,
    config: BatchConfig,
    clock: Arc<dyn Clock>,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    key_of_req: KeyFn<Req, K>,
    key_of_resp: KeyFn<Resp, K>,
    run: RunFn<Req, Resp>,
}

#[async_trait]
impl<Req, Resp, K> Worker for Reader<Req, Resp, K>
where
    Req: Send + 'static,
    Resp: Clone + Send + 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn step(&mut self, token: &CancellationToken) -> Result<Step, Error> {
        let group = self
            .inbox
            .read_many(self.config.batch_size, self.config.batch_delay, &self.clock, token)
            .await?;
        if group.is_empty() {
            return Ok(Step::Stop);
        }

        let permit = tokio::select! {
            _ = token.cancelled() => return Err(Error::Canceled),
            permit = self.gate.clone().acquire_owned() => {
                permit.expect("admission semaphore is never closed")
            }
        };

        let key_of_req = self.key_of_req.clone();
        let key_of_resp = self.key_of_resp.clone();
        let run = self.run.clone();
        let token = token.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            dispatch(group, key_of_req, key_of_resp, run, token).await;
        });
        Ok(Step::Continue)
    }
}

/// Runs one batch call and resolves every mailbox of the group exactly once.
async fn dispatch<Req, Resp, K>(
    group: Vec<Mailbox<Req, Resp>>,
    key_of_req: KeyFn<Req, K>,
    key_of_resp: KeyFn<Resp, K>,
    run: RunFn<Req, Resp>,
    token: CancellationToken,
) where
    Resp: Clone,
    K: Eq + Hash + Clone + fmt::Debug,
{
    // One representative request per distinct key, in first-arrival order.
    let mut representatives = Vec::with_capacity(group.len());
    let mut waiters: HashMap<K, Vec<oneshot::Sender<Result<Resp, Error>>>> =
        HashMap::with_capacity(group.len());
    for mailbox in group {
        let key = (*key_of_req)(&mailbox.req);
        match waiters.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().push(mailbox.reply),
            Entry::Vacant(entry) => {
                entry.insert(vec![mailbox.reply]);
                representatives.push(mailbox.req);
            }
        }
    }

    match (*run)(representatives, token).await {
        Ok(responses) => {
            for response in responses {
                let key = (*key_of_resp)(&response);
                if let Some(replies) = waiters.remove(&key) {
                    for reply in replies {
                        let _ = reply.send(Ok(response.clone()));
                    }
                }
            }
            for (key, replies) in waiters {
                let miss = Error::MissingResponse {
                    key: format!("{key:?}"),
                };
                for reply in replies {
                    let _ = reply.send(Err(miss.clone()));
                }
            }
        }
        Err(cause) => {
            for replies in waiters.into_values() {
                for reply in replies {
                    let _ = reply.send(Err(cause.clone()));
                }
            }
        }
    }
}
