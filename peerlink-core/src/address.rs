//! Endpoint addressing.
//!
//! An [`EndpointAddress`] names a peer endpoint the way messengers dial it:
//! a transport protocol, a protocol-specific address, and an optional
//! service name and service parameter that select a handler on the remote
//! side.
//!
//! The textual form is `protocol://address[/service[/param]]`.

use serde::{Deserialize, Serialize};

/// Structured address of a peer endpoint.
///
/// # Examples
///
/// ```
/// use peerlink_core::EndpointAddress;
///
/// let addr = EndpointAddress::new("tcp", "10.0.0.1:9701").with_service("chat");
/// assert_eq!(addr.to_string(), "tcp://10.0.0.1:9701/chat");
///
/// let parsed = EndpointAddress::parse("tcp://10.0.0.1:9701/chat").expect("parse");
/// assert_eq!(parsed, addr);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddress {
    /// Transport protocol name (`tcp`, `http`, `relay`, ...).
    pub protocol: String,
    /// Protocol-specific address of the peer.
    pub address: String,
    /// Service on the remote endpoint, if any.
    pub service: Option<String>,
    /// Parameter for the remote service, if any.
    pub param: Option<String>,
}

impl EndpointAddress {
    /// Create an address with no service or parameter.
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            service: None,
            param: None,
        }
    }

    /// Return a copy addressing the given service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Return a copy with the given service parameter.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Return a copy with service and parameter replaced.
    ///
    /// `None` keeps the current value, so this can be used to apply per-channel
    /// defaults on top of a base address.
    pub fn with_overrides(&self, service: Option<&str>, param: Option<&str>) -> Self {
        let mut addr = self.clone();
        if let Some(service) = service {
            addr.service = Some(service.to_string());
        }
        if let Some(param) = param {
            addr.param = Some(param.to_string());
        }
        addr
    }

    /// The protocol and address only, without service or parameter.
    pub fn base(&self) -> Self {
        Self::new(self.protocol.clone(), self.address.clone())
    }

    /// Whether two addresses designate the same peer, ignoring service and parameter.
    pub fn same_peer(&self, other: &EndpointAddress) -> bool {
        self.protocol == other.protocol && self.address == other.address
    }

    /// Parse from `protocol://address[/service[/param]]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol separator is missing, the address is
    /// empty, or there are more than two path segments.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        let (protocol, rest) = s
            .split_once("://")
            .ok_or(AddressParseError::MissingProtocol)?;
        if protocol.is_empty() {
            return Err(AddressParseError::MissingProtocol);
        }

        let mut segments = rest.split('/');
        let address = segments.next().unwrap_or_default();
        if address.is_empty() {
            return Err(AddressParseError::EmptyAddress);
        }

        let service = segments.next().filter(|s| !s.is_empty());
        let param = segments.next().filter(|s| !s.is_empty());
        if segments.next().is_some() {
            return Err(AddressParseError::TooManySegments);
        }

        Ok(Self {
            protocol: protocol.to_string(),
            address: address.to_string(),
            service: service.map(str::to_string),
            param: param.map(str::to_string),
        })
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)?;
        match (&self.service, &self.param) {
            (Some(service), Some(param)) => write!(f, "/{}/{}", service, param),
            (Some(service), None) => write!(f, "/{}", service),
            // A parameter without a service keeps an empty service segment.
            (None, Some(param)) => write!(f, "//{}", param),
            (None, None) => Ok(()),
        }
    }
}

impl std::str::FromStr for EndpointAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing an endpoint address from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// No `protocol://` prefix found in the input.
    #[error("missing protocol separator")]
    MissingProtocol,
    /// The protocol-specific address part is empty.
    #[error("empty address")]
    EmptyAddress,
    /// More than `service/param` follows the address.
    #[error("too many path segments")]
    TooManySegments,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = EndpointAddress::new("tcp", "127.0.0.1:9701");
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:9701");

        let addr = addr.with_service("rendezvous").with_param("group-1");
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:9701/rendezvous/group-1");
    }

    #[test]
    fn test_address_parse() {
        let addr = EndpointAddress::parse("relay://peer-42/chat/room").expect("parse");
        assert_eq!(addr.protocol, "relay");
        assert_eq!(addr.address, "peer-42");
        assert_eq!(addr.service.as_deref(), Some("chat"));
        assert_eq!(addr.param.as_deref(), Some("room"));
    }

    #[test]
    fn test_address_param_without_service_roundtrips() {
        let addr = EndpointAddress::new("tcp", "a:1").with_param("p");
        let text = addr.to_string();
        assert_eq!(text, "tcp://a:1//p");
        assert_eq!(EndpointAddress::parse(&text).expect("parse"), addr);
    }

    #[test]
    fn test_address_parse_errors() {
        assert_eq!(
            EndpointAddress::parse("127.0.0.1:9701"),
            Err(AddressParseError::MissingProtocol)
        );
        assert_eq!(
            EndpointAddress::parse("://host"),
            Err(AddressParseError::MissingProtocol)
        );
        assert_eq!(
            EndpointAddress::parse("tcp://"),
            Err(AddressParseError::EmptyAddress)
        );
        assert_eq!(
            EndpointAddress::parse("tcp://h/a/b/c"),
            Err(AddressParseError::TooManySegments)
        );
    }

    #[test]
    fn test_address_overrides_keep_unset_fields() {
        let base = EndpointAddress::new("tcp", "h:1")
            .with_service("svc")
            .with_param("p");
        let over = base.with_overrides(None, Some("q"));
        assert_eq!(over.service.as_deref(), Some("svc"));
        assert_eq!(over.param.as_deref(), Some("q"));
        assert!(over.same_peer(&base));
        assert_eq!(over.base(), EndpointAddress::new("tcp", "h:1"));
    }

    #[test]
    fn test_address_serde_roundtrip() {
        let addr = EndpointAddress::new("tcp", "h:1").with_service("svc");
        let json = serde_json::to_string(&addr).expect("serialize");
        let decoded: EndpointAddress = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(addr, decoded);
    }
}
