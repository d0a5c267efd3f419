//! Request coalescing.
//!
//! ## Contents
//! - [`BatchConfig`] size / delay / concurrency settings
//! - [`BatchBuilder`] the coalescer: many concurrent requests → bounded
//!   batched calls → per-caller demultiplexed responses
//!
//! See `builder.rs` for the pipeline diagram and dispatch rules.

mod builder;
mod config;

pub use builder::BatchBuilder;
pub use config::BatchConfig;
