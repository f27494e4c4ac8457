//! Channel scheduler: one connection, one state engine, many channels.
//!
//! # Architecture
//!
//! - [`ChannelScheduler`]: public handle, owns the shared state
//! - `core`: lock-protected bookkeeping and the engine action adapter
//! - `worker`: background task running deferred `connect` and `start` actions
//!
//! Callers only ever schedule work under the lock. The transport is driven
//! exclusively from the worker task, at most one per scheduler.

mod core;
mod worker;

pub use self::core::ChannelScheduler;
pub(crate) use self::core::{Inner, Rejected, Shared};
