//! The per-destination messenger contract.

use std::time::Duration;

use async_trait::async_trait;
use peerlink_core::{EndpointAddress, Message};

use crate::channel::Channel;
use crate::error::MessengerResult;
use crate::state::{MessengerState, StateMask};

/// An addressable, stateful handle sending messages toward one destination.
///
/// Connection-level failures are never returned from these methods directly;
/// they surface through [`state`](Messenger::state) and
/// [`wait_state`](Messenger::wait_state).
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send and wait until the message is delivered or failed.
    async fn send(&self, message: Message) -> MessengerResult<()>;

    /// Send to an explicit service and parameter.
    async fn send_to(
        &self,
        message: Message,
        service: Option<&str>,
        param: Option<&str>,
    ) -> MessengerResult<()>;

    /// Queue without waiting. Returns whether the message was accepted.
    fn try_send(&self, message: Message) -> bool;

    /// Ask for the connection to be established.
    fn resolve(&self);

    /// Stop accepting messages, letting queued ones drain.
    fn close(&self);

    /// Wait until nothing is queued.
    async fn flush(&self) -> MessengerResult<()>;

    /// Current state.
    fn state(&self) -> MessengerState;

    /// Wait until the state is in `mask` or `timeout` elapses.
    async fn wait_state(&self, mask: StateMask, timeout: Duration) -> MessengerState;

    /// Address messages are sent to.
    fn destination_address(&self) -> EndpointAddress;

    /// Peer identity as vouched for by the transport, once known.
    fn logical_destination_address(&self) -> Option<EndpointAddress>;

    /// Whether the messenger may still accept messages.
    fn is_usable(&self) -> bool {
        self.state().is_usable()
    }
}

#[async_trait]
impl Messenger for Channel {
    async fn send(&self, message: Message) -> MessengerResult<()> {
        Channel::send(self, message).await
    }

    async fn send_to(
        &self,
        message: Message,
        service: Option<&str>,
        param: Option<&str>,
    ) -> MessengerResult<()> {
        Channel::send_to(self, message, service, param).await
    }

    fn try_send(&self, message: Message) -> bool {
        Channel::try_send(self, message)
    }

    fn resolve(&self) {
        Channel::resolve(self);
    }

    fn close(&self) {
        Channel::close(self);
    }

    async fn flush(&self) -> MessengerResult<()> {
        Channel::flush(self).await
    }

    fn state(&self) -> MessengerState {
        Channel::state(self)
    }

    async fn wait_state(&self, mask: StateMask, timeout: Duration) -> MessengerState {
        Channel::wait_state(self, mask, timeout).await
    }

    fn destination_address(&self) -> EndpointAddress {
        Channel::destination_address(self)
    }

    fn logical_destination_address(&self) -> Option<EndpointAddress> {
        Channel::logical_destination_address(self)
    }
}
