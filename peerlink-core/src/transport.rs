//! Transport binding abstraction.
//!
//! A [`TransportBinding`] owns one physical connection toward a single peer.
//! Messengers never perform I/O themselves: they call into the binding from
//! their background worker and react to the outcome.
//!
//! Implementations must tolerate [`close_connection`](TransportBinding::close_connection)
//! being called from another thread while a `connect` or `send_one` call is in
//! progress, and must make that call finish (with success or failure) in
//! bounded time.

use std::io;

use async_trait::async_trait;

use crate::{EndpointAddress, Message, MessageTarget};

/// Errors reported by a transport binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A message could not be written to the connection.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection was closed locally or by the peer.
    #[error("connection closed")]
    Closed,

    /// The operation did not complete in time.
    #[error("operation timed out")]
    TimedOut,

    /// The peer answering the connection is not the expected one.
    #[error("logical peer mismatch: expected {expected}, got {actual}")]
    IdentityMismatch {
        /// Identity that was expected.
        expected: EndpointAddress,
        /// Identity the transport reported.
        actual: EndpointAddress,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Connection-owning side of a messenger.
///
/// All methods are invoked by the messenger's background worker except
/// `close_connection`, which may be invoked from any thread while holding the
/// messenger's lock. It must therefore not block.
#[async_trait]
pub trait TransportBinding: Send + Sync + 'static {
    /// Establish the underlying connection.
    async fn connect(&self) -> TransportResult<()>;

    /// Write one message to the established connection.
    async fn send_one(&self, message: &Message, target: &MessageTarget) -> TransportResult<()>;

    /// Force the connection closed. Must not block.
    fn close_connection(&self);

    /// Identity of the remote peer as vouched for by the transport.
    ///
    /// Only meaningful after a successful `connect`; `None` means the
    /// transport cannot tell, in which case the dialed address is assumed.
    fn logical_peer(&self) -> Option<EndpointAddress>;
}
