//! # peerlink messenger
//!
//! Connection lifecycle and channel multiplexing for peer-to-peer messaging.
//!
//! This crate provides:
//! - **State engine**: a fixed transition table driving one connection
//!   through resolution, sending, reconnection and shutdown
//! - **Channel scheduler**: one connection shared by many channels, drained
//!   by a single on-demand background worker
//! - **Channels**: per-destination messengers with their own FIFO queue
//!
//! The physical connection itself is supplied by a
//! [`TransportBinding`](peerlink_core::TransportBinding).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use peerlink_messenger::{ChannelScheduler, MessengerConfig, StateMask};
//!
//! let scheduler = ChannelScheduler::new(destination, transport, MessengerConfig::default())?;
//! let channel = scheduler.channel_messenger(None, Some("chat"), None);
//! channel.send(Message::new("hello")).await?;
//! channel.close();
//! channel.wait_state(StateMask::TERMINAL, Duration::from_secs(5)).await;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use peerlink_core::{
    EndpointAddress, Message, MessageTarget, TransportBinding, TransportError, TransportResult,
};

// =============================================================================
// Modules
// =============================================================================

/// Messenger states and composite state masks.
pub mod state;

/// Finite state engine and its transition table.
pub mod engine;

/// Error types for messenger operations.
pub mod error;

/// Scheduler and channel configuration.
pub mod config;

/// Scheduler counters.
pub mod metrics;

/// Channels multiplexed over a scheduler.
pub mod channel;

/// The channel scheduler and its background worker.
pub mod scheduler;

/// The per-destination messenger trait.
pub mod messenger;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use channel::{Channel, ChannelId, Resolution};
pub use config::{Fairness, MessengerConfig};
pub use engine::{Action, EngineActions, Event, StateEngine, transition};
pub use error::{MessengerError, MessengerResult};
pub use messenger::Messenger;
pub use metrics::SchedulerMetrics;
pub use scheduler::ChannelScheduler;
pub use state::{MessengerState, StateMask};
