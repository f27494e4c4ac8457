//! # peerlink-core
//!
//! Shared types for the peerlink messaging substrate:
//!
//! - [`EndpointAddress`]: structured peer endpoint addressing
//! - [`Message`], [`MessageTarget`]: what messengers carry and where to
//! - [`MessageCodec`], [`JsonCodec`]: pluggable payload serialization
//! - [`TransportBinding`]: the contract a protocol module implements to own
//!   one physical connection

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod address;
mod message;
mod transport;

pub use address::{AddressParseError, EndpointAddress};
pub use message::{CodecError, JsonCodec, Message, MessageCodec, MessageTarget};
pub use transport::{TransportBinding, TransportError, TransportResult};
