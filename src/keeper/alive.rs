//! # Per-item claim upkeep.
//!
//! [`AliveKeeper`] runs one touch loop per registered item and serves
//! on-demand deletes, both batched through [`BatchBuilder`]s and gated by a
//! [`SyncPolicy`].
//!
//! ## Architecture
//! ```text
//! register(item) ──► registry[item] = InFlight{cancel}
//!                        │ spawn touch loop
//!                        ▼
//!      loop: sleep(touch_interval | retry_interval)
//!            inactive? → exit
//!            touch builder ── filter ActiveOnly ── policy(Touch) ── ops.touch
//!            failure past retry_limit → exit
//!      exit path always deactivates the item
//!
//! delete(item) ──► delete builder ── filter ActiveOnly ── policy(Delete) ── ops.delete
//!                        │ retry up to retry_limit (not while disposing)
//!                        ▼ deactivate on completion
//! ```
//!
//! ## Rules
//! - At most one registry entry per item; `register` of a present item is a
//!   no-op.
//! - Touch and delete batches filter their input through the registry and
//!   silently drop items no longer present; empty batches short-circuit
//!   without entering the policy or calling the user operation.
//! - After `forget` or a terminal touch failure no further touch requests
//!   for the item are issued; an in-flight batch may still observe it until
//!   the call returns.
//! - Background loops never crash on user-callback errors: they log at warn
//!   and retry, or at error and exit past `retry_limit`.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchBuilder, BatchConfig};
use crate::clock::{Clock, TokioClock};
use crate::error::Error;
use crate::keeper::KeeperConfig;
use crate::sync::{Side, SyncPolicy};

/// Batched operations on a source of claimed items.
///
/// Both batch calls return the successfully-processed subset; an item absent
/// from the result counts as failed for that item.
#[async_trait]
pub trait LeaseOps: Send + Sync + 'static {
    /// The claimed item (a receipt, a lease handle).
    type Item: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// Renews the claim on every item of the batch.
    async fn touch(
        &self,
        items: Vec<Self::Item>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Item>, Error>;

    /// Releases the claim on every item of the batch.
    ///
    /// The default treats every delete as trivially successful, for sources
    /// whose claims only expire.
    async fn delete(
        &self,
        items: Vec<Self::Item>,
        token: &CancellationToken,
    ) -> Result<Vec<Self::Item>, Error> {
        let _ = token;
        Ok(items)
    }

    /// Stable rendering of an item for log lines.
    fn identity(&self, item: &Self::Item) -> String {
        format!("{item:?}")
    }
}

/// Per-item registration: the handle that ends its touch loop.
struct InFlight {
    cancel: CancellationToken,
}

/// Lifecycle manager for items with bounded lifetime claims.
///
/// Cheap to clone; clones share the registry and the batch pipelines.
pub struct AliveKeeper<O: LeaseOps> {
    ops: Arc<O>,
    config: KeeperConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<DashMap<O::Item, InFlight>>,
    touch: Arc<BatchBuilder<O::Item, O::Item, O::Item>>,
    delete: Arc<BatchBuilder<O::Item, O::Item, O::Item>>,
    token: CancellationToken,
    disposing: Arc<AtomicBool>,
}

impl<O: LeaseOps> Clone for AliveKeeper<O> {
    fn clone(&self) -> Self {
        Self {
            ops: self.ops.clone(),
            config: self.config,
            clock: self.clock.clone(),
            registry: self.registry.clone(),
            touch: self.touch.clone(),
            delete: self.delete.clone(),
            token: self.token.clone(),
            disposing: self.disposing.clone(),
        }
    }
}

impl<O: LeaseOps> AliveKeeper<O> {
    /// Creates a keeper over the given operations, using the tokio clock.
    pub fn new(config: KeeperConfig, ops: O) -> Self {
        Self::with_clock(config, ops, Arc::new(TokioClock))
    }

    /// Same as [`new`](Self::new) with an injected [`Clock`].
    pub fn with_clock(config: KeeperConfig, ops: O, clock: Arc<dyn Clock>) -> Self {
        let config = config.clamped();
        let ops = Arc::new(ops);
        let registry: Arc<DashMap<O::Item, InFlight>> = Arc::new(DashMap::new());
        let policy = Arc::new(SyncPolicy::select(config.sync_mode, config.concurrency));
        let token = CancellationToken::new();
        debug!(
            "[keeper] created policy={:?} concurrency={}",
            policy.mode(),
            config.concurrency
        );

        let touch = {
            let ops = ops.clone();
            let registry = registry.clone();
            let policy = policy.clone();
            Arc::new(BatchBuilder::with_clock(
                "keeper/touch",
                BatchConfig {
                    batch_size: config.touch_batch_size,
                    batch_delay: config.touch_batch_delay,
                    concurrency: config.concurrency,
                },
                |item: &O::Item| item.clone(),
                |item: &O::Item| item.clone(),
                move |items, batch_token| {
                    let ops = ops.clone();
                    let registry = registry.clone();
                    let policy = policy.clone();
                    async move {
                        let live = active_only(&registry, items);
                        if live.is_empty() {
                            return Ok(Vec::new());
                        }
                        let _slot = policy.enter(Side::Touch).await;
                        ops.touch(live, &batch_token).await
                    }
                },
                clock.clone(),
                token.child_token(),
            ))
        };

        let delete = {
            let ops = ops.clone();
            let registry = registry.clone();
            let policy = policy.clone();
            Arc::new(BatchBuilder::with_clock(
                "keeper/delete",
                BatchConfig {
                    batch_size: config.delete_batch_size,
                    batch_delay: std::time::Duration::ZERO,
                    concurrency: config.concurrency,
                },
                |item: &O::Item| item.clone(),
                |item: &O::Item| item.clone(),
                move |items, batch_token| {
                    let ops = ops.clone();
                    let registry = registry.clone();
                    let policy = policy.clone();
                    async move {
                        let live = active_only(&registry, items);
                        if live.is_empty() {
                            return Ok(Vec::new());
                        }
                        let _slot = policy.enter(Side::Delete).await;
                        ops.delete(live, &batch_token).await
                    }
                },
                clock.clone(),
                token.child_token(),
            ))
        };

        Self {
            ops,
            config,
            clock,
            registry,
            touch,
            delete,
            token,
            disposing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns whether the item currently has a registration.
    pub fn is_registered(&self, item: &O::Item) -> bool {
        self.registry.contains_key(item)
    }

    /// Returns the number of registered items.
    pub fn active(&self) -> usize {
        self.registry.len()
    }

    /// Starts the touch loop for `item`.
    ///
    /// No-op when the item is already registered or the keeper is disposing.
    /// A caller token, when given, deactivates the item on cancellation.
    pub fn register(&self, item: O::Item, token: Option<&CancellationToken>) {
        if self.disposing.load(Ordering::SeqCst) {
            return;
        }

        let cancel = self.token.child_token();
        {
            use dashmap::mapref::entry::Entry;
            match self.registry.entry(item.clone()) {
                Entry::Occupied(_) => return,
                Entry::Vacant(vacant) => {
                    vacant.insert(InFlight {
                        cancel: cancel.clone(),
                    });
                }
            }
        }

        if let Some(user) = token {
            let user = user.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = user.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            });
        }

        let keeper = self.clone();
        tokio::spawn(async move { keeper.touch_loop(item, cancel).await });
    }

    /// Releases the claim on `item` and deactivates it.
    ///
    /// Resolves immediately when the item is not registered. Retries up to
    /// `retry_limit` times with `retry_interval` pauses (never while the
    /// keeper is disposing); resolves with the last error once exhausted.
    pub async fn delete(
        &self,
        item: O::Item,
        token: Option<&CancellationToken>,
    ) -> Result<(), Error> {
        if !self.registry.contains_key(&item) {
            return Ok(());
        }

        let mut attempts: u32 = 0;
        let outcome = loop {
            match self.delete.request(item.clone()).await {
                Ok(_) => break Ok(()),
                Err(e) => {
                    if !self.registry.contains_key(&item) {
                        // Another deleter (or a forget) already won.
                        break Ok(());
                    }
                    if e.is_termination() {
                        break Err(e);
                    }
                    attempts += 1;
                    if attempts > self.config.retry_limit {
                        error!(
                            "[keeper] delete retries exhausted item={} attempts={attempts} err={e}",
                            self.ops.identity(&item)
                        );
                        break Err(e);
                    }
                    warn!(
                        "[keeper] delete failed item={} attempt={attempts}/{} err={e}",
                        self.ops.identity(&item),
                        self.config.retry_limit
                    );
                    if self.pause(self.config.retry_interval, token).await.is_err() {
                        break Err(Error::Canceled);
                    }
                }
            }
        };
        self.deactivate(&item);
        outcome
    }

    /// Deactivates `item` without releasing the claim; its touch loop exits
    /// on the next wake and the claim expires at the source.
    pub fn forget(&self, item: &O::Item) {
        self.deactivate(item);
    }

    /// Stops every touch loop and waits until the registry is empty, polling
    /// with the configured backoff; then tears down the batch pipelines.
    ///
    /// A caller token, when given, abandons the wait on cancellation.
    pub async fn shutdown(&self, token: Option<&CancellationToken>) {
        self.disposing.store(true, Ordering::SeqCst);
        self.token.cancel();

        let never = CancellationToken::new();
        let bound = token.unwrap_or(&never);
        let mut prev = None;
        while !self.registry.is_empty() {
            if bound.is_cancelled() {
                warn!(
                    "[keeper] shutdown abandoned with {} items still registered",
                    self.registry.len()
                );
                break;
            }
            let pause = self.config.shutdown_backoff.next(prev);
            prev = Some(pause);
            if self.clock.delay(pause, bound).await.is_err() {
                break;
            }
        }

        self.touch.dispose().await;
        self.delete.dispose().await;
        debug!("[keeper] disposed");
    }

    /// Shutdown without a caller token. Idempotent.
    pub async fn dispose(&self) {
        self.shutdown(None).await;
    }

    /// One item's periodic upkeep. The exit path always deactivates.
    async fn touch_loop(&self, item: O::Item, cancel: CancellationToken) {
        let mut failures: u32 = 0;
        loop {
            let pause = if failures == 0 {
                self.config.touch_interval
            } else {
                self.config.retry_interval
            };
            if self.clock.delay(pause, &cancel).await.is_err() {
                break;
            }
            if !self.registry.contains_key(&item) {
                break;
            }
            match self.touch.request(item.clone()).await {
                Ok(_) => failures = 0,
                Err(e) if e.is_termination() => break,
                Err(e) => {
                    if !self.registry.contains_key(&item) {
                        break;
                    }
                    failures += 1;
                    if failures > self.config.retry_limit {
                        error!(
                            "[keeper] touch retries exhausted item={} attempts={failures} err={e}",
                            self.ops.identity(&item)
                        );
                        break;
                    }
                    warn!(
                        "[keeper] touch failed item={} attempt={failures}/{} err={e}",
                        self.ops.identity(&item),
                        self.config.retry_limit
                    );
                }
            }
        }
        self.deactivate(&item);
    }

    /// Removes the registry entry and cancels its touch loop.
    fn deactivate(&self, item: &O::Item) {
        if let Some((_, in_flight)) = self.registry.remove(item) {
            in_flight.cancel.cancel();
        }
    }

    /// Sleeps `dur` honoring the keeper token and an optional caller token.
    async fn pause(&self, dur: std::time::Duration, token: Option<&CancellationToken>) -> Result<(), Error> {
        match token {
            Some(user) => tokio::select! {
                res = self.clock.delay(dur, &self.token) => res,
                _ = user.cancelled() => Err(Error::Canceled),
            },
            None => self.clock.delay(dur, &self.token).await,
        }
    }
}

/// Filters a batch down to the items still present in the registry.
fn active_only<K, V>(registry: &DashMap<K, V>, items: Vec<K>) -> Vec<K>
where
    K: Eq + Hash,
{
    items
        .into_iter()
        .filter(|item| registry.contains_key(item))
        .collect()
}
