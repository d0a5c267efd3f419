//! Polling pipeline over an external lease-based source.
//!
//! ## Contents
//! - [`Poller`] the upstream contract (receive / touch / delete)
//! - [`Handler`] / [`HandlerFn`] the per-message unit of work
//! - [`SubscriberConfig`] pool sizes, intervals, batching knobs
//! - [`BatchSubscriber`] the pump: poll → register → handle → delete
//!
//! See `core.rs` for the topology diagram and the shutdown order.

mod config;
mod core;
mod handler;
mod poller;

pub use config::SubscriberConfig;
pub use core::BatchSubscriber;
pub use handler::{Handler, HandlerFn};
pub use poller::Poller;
