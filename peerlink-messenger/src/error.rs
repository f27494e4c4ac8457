//! Error types for messenger operations.

use peerlink_core::TransportError;

use crate::state::MessengerState;

/// Errors that can occur during messenger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessengerError {
    /// The messenger or channel no longer accepts messages.
    #[error("messenger is closed for input")]
    InputClosed,

    /// The channel's queue is full.
    #[error("channel queue is full ({capacity} messages)")]
    Saturated {
        /// Queue capacity of the channel.
        capacity: usize,
    },

    /// The message failed twice and was bounced.
    #[error("message bounced: {0}")]
    SendFailed(TransportError),

    /// The shared connection failed before the message could be sent.
    #[error("connection failed in state {state}")]
    ConnectionFailed {
        /// State the messenger was in when the message was failed.
        state: MessengerState,
    },

    /// The messenger reached a state where the operation cannot complete.
    #[error("messenger unusable in state {state}")]
    Unusable {
        /// State observed when giving up.
        state: MessengerState,
    },

    /// The message was discarded without an outcome.
    #[error("message abandoned without outcome")]
    Abandoned,

    /// A scheduler was created outside of a Tokio runtime.
    #[error("no Tokio runtime available to run the messenger worker")]
    NoRuntime,
}

/// Result type for messenger operations.
pub type MessengerResult<T> = Result<T, MessengerError>;
