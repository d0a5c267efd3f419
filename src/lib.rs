//! # batchvisor
//!
//! **Batchvisor** is a library of concurrent primitives for driving batched,
//! long-lived interactions with external sources whose items carry bounded
//! lifetime claims (lease-based queues: receipts must be periodically
//! renewed and explicitly deleted after processing).
//!
//! ## Features
//!
//! | Area             | Description                                                            | Key types / traits                       |
//! |------------------|------------------------------------------------------------------------|------------------------------------------|
//! | **Coalescing**   | Turn many concurrent requests into bounded batched calls, demux by key. | [`BatchBuilder`], [`BatchConfig`]        |
//! | **Upkeep**       | Per-item touch loops and batched deletes over a registry.               | [`AliveKeeper`], [`LeaseOps`], [`KeeperConfig`] |
//! | **Pipelines**    | Poll an external source, handle under a concurrency limit, ack.         | [`BatchSubscriber`], [`Poller`], [`Handler`] |
//! | **Interleaving** | Gate touch vs delete batches: safe, unrestricted, or alternating.       | [`SyncMode`], [`SyncPolicy`]             |
//! | **Loops**        | Supervised cooperative loops that survive transient errors.             | [`Agent`], [`Worker`], [`Step`]          |
//! | **Toolkit**      | Latch, windowed channel reads, injectable time, retry pacing.           | [`ManualResetSignal`], [`Inbox`], [`Clock`], [`BackoffPolicy`] |
//! | **Errors**       | One cloneable error enum shared by components and user callbacks.       | [`Error`]                                |
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use batchvisor::{BatchBuilder, BatchConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), batchvisor::Error> {
//!     // Coalesce concurrent lookups into batches of up to 100.
//!     let lookup = BatchBuilder::new(
//!         "lookup",
//!         BatchConfig {
//!             batch_size: 100,
//!             batch_delay: Duration::from_millis(5),
//!             concurrency: 2,
//!         },
//!         |id: &u64| *id,
//!         |row: &(u64, String)| row.0,
//!         |ids, _token| async move {
//!             // One round-trip for the whole batch.
//!             Ok(ids.into_iter().map(|id| (id, format!("row-{id}"))).collect())
//!         },
//!     );
//!
//!     let row = lookup.request(42).await?;
//!     assert_eq!(row.1, "row-42");
//!     lookup.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//! - Every request future resolves exactly once: with its keyed response,
//!   a missing-response failure, or the batch's own error.
//! - A user batch call never sees duplicate keys in one invocation.
//! - Background loops never crash on user-callback errors; they log and
//!   retry subject to limits.
//! - Disposal is idempotent on every component and drains rather than drops
//!   wherever the teardown is graceful.
//!
//! ---

mod agent;
mod backoff;
mod batch;
mod clock;
mod error;
mod keeper;
mod subscriber;
mod sync;

// ---- Public re-exports ----

pub use agent::{Agent, Step, Worker};
pub use backoff::{BackoffPolicy, JitterPolicy};
pub use batch::{BatchBuilder, BatchConfig};
pub use clock::{Clock, TokioClock};
pub use error::Error;
pub use keeper::{AliveKeeper, KeeperConfig, LeaseOps};
pub use subscriber::{BatchSubscriber, Handler, HandlerFn, Poller, SubscriberConfig};
pub use sync::{inbox, Inbox, InboxSender, ManualResetSignal, Side, SyncGuard, SyncMode, SyncPolicy};
