//! Messages and payload encoding.
//!
//! A [`Message`] is an opaque body plus a set of named elements. Messengers
//! never look inside a message; they only queue it and hand it to a
//! [`TransportBinding`](crate::TransportBinding) together with a
//! [`MessageTarget`].
//!
//! Typed payloads go through a [`MessageCodec`]. [`JsonCodec`] is provided
//! for debugging and tests:
//!
//! ```rust
//! use peerlink_core::{JsonCodec, Message};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Chat { text: String }
//!
//! let msg = Message::encode(&JsonCodec, &Chat { text: "hi".into() }).expect("encode");
//! let back: Chat = msg.decode(&JsonCodec).expect("decode");
//! assert_eq!(back.text, "hi");
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value into a message body.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode a message body into a value.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable payload serialization format.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// An outbound or inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    body: Vec<u8>,
    elements: BTreeMap<String, Vec<u8>>,
}

impl Message {
    /// Create a message with the given body and no elements.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            elements: BTreeMap::new(),
        }
    }

    /// Encode a typed value as the message body.
    ///
    /// # Errors
    ///
    /// Returns the codec's encode error.
    pub fn encode<C: MessageCodec, T: Serialize>(codec: &C, value: &T) -> Result<Self, CodecError> {
        Ok(Self::new(codec.encode(value)?))
    }

    /// Decode the message body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the codec's decode error.
    pub fn decode<C: MessageCodec, T: DeserializeOwned>(&self, codec: &C) -> Result<T, CodecError> {
        codec.decode(&self.body)
    }

    /// Message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total size in bytes of body and elements.
    pub fn len(&self) -> usize {
        self.body.len()
            + self
                .elements
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    /// Whether the message carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach a named element, replacing any previous element with that name.
    pub fn with_element(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.set_element(name, value);
        self
    }

    /// Set a named element, returning the previous value if any.
    pub fn set_element(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Option<Vec<u8>> {
        self.elements.insert(name.into(), value.into())
    }

    /// Look up a named element.
    pub fn element(&self, name: &str) -> Option<&[u8]> {
        self.elements.get(name).map(Vec::as_slice)
    }

    /// Iterate named elements in name order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Per-send addressing handed to the transport with each message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTarget {
    /// Destination service, if any.
    pub service: Option<String>,
    /// Destination service parameter, if any.
    pub param: Option<String>,
    /// Redirection the message must take before reaching the service.
    pub redirection: Option<String>,
}

impl MessageTarget {
    /// Create a target for a service and parameter, without redirection.
    pub fn new(service: Option<String>, param: Option<String>) -> Self {
        Self {
            service,
            param,
            redirection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct TestMessage {
        id: u32,
        content: String,
    }

    #[test]
    fn test_json_codec_roundtrip_through_message() {
        let value = TestMessage {
            id: 42,
            content: "hello world".to_string(),
        };

        let msg = Message::encode(&JsonCodec, &value).expect("encode should succeed");
        let decoded: TestMessage = msg.decode(&JsonCodec).expect("decode should succeed");

        assert_eq!(value, decoded);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let msg = Message::new(&b"not valid json {"[..]);

        let result: Result<TestMessage, CodecError> = msg.decode(&JsonCodec);
        let err = result.expect_err("decode must fail");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn test_message_elements() {
        let mut msg = Message::new("body").with_element("b", "2").with_element("a", "1");
        assert_eq!(msg.element("a"), Some(&b"1"[..]));
        assert_eq!(msg.element("missing"), None);

        let previous = msg.set_element("a", "3");
        assert_eq!(previous, Some(b"1".to_vec()));

        let names: Vec<&str> = msg.elements().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(msg.len(), 4 + 2 + 2);
    }

    #[test]
    fn test_empty_message() {
        assert!(Message::default().is_empty());
        assert!(!Message::new("x").is_empty());
    }
}
