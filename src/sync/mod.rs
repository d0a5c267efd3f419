//! Synchronization toolkit the batching components stand on.
//!
//! ## Contents
//! - [`ManualResetSignal`] awaitable latch with reset and timed wait
//! - [`inbox`] / [`InboxSender`] / [`Inbox`] inbound queue with windowed
//!   batch reads (`read_many`)
//! - [`SyncMode`] / [`SyncPolicy`] / [`SyncGuard`] / [`Side`] the
//!   touch/delete interleaving gate
//!
//! ## Rules
//! - No component awaits while holding a lock; every critical section here
//!   is short and synchronous.
//! - Every admission ([`SyncPolicy::enter`]) is released by the returned
//!   guard on drop, on every exit path.

mod inbox;
mod policy;
mod signal;

pub use inbox::{inbox, Inbox, InboxSender};
pub use policy::{Side, SyncGuard, SyncMode, SyncPolicy};
pub use signal::ManualResetSignal;
