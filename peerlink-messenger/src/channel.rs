//! Channels: logical messengers sharing one scheduler connection.
//!
//! A [`Channel`] has its own default service and parameter, its own bounded
//! FIFO of pending messages and a state derived from both that queue and the
//! shared connection. All channel data lives inside the scheduler behind its
//! single lock; the handle only carries an id.
//!
//! Dropping a handle abandons the channel. A channel with nothing queued is
//! forgotten immediately. A channel with queued messages stays registered
//! until those messages are sent or failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::{EndpointAddress, Message, MessageTarget, TransportError};
use tokio::sync::oneshot;

use crate::error::{MessengerError, MessengerResult};
use crate::scheduler::{Inner, Rejected, Shared};
use crate::state::{MessengerState, StateMask};

/// Identifier of a channel within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u64);

/// Outcome of the connection attempt a channel asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Not asked, or still waiting.
    Pending,
    /// The shared connection was established.
    Connected,
    /// The shared connection could not be established.
    Failed,
}

pub(crate) type Outcome = oneshot::Sender<MessengerResult<()>>;

/// A queued message awaiting delivery.
pub(crate) struct PendingMessage {
    pub(crate) seq: u64,
    pub(crate) message: Arc<Message>,
    pub(crate) target: MessageTarget,
    /// Set by the first failed attempt; a second failure bounces the message.
    pub(crate) failure: Option<TransportError>,
    pub(crate) outcome: Option<Outcome>,
}

impl PendingMessage {
    pub(crate) fn new(message: Arc<Message>, target: MessageTarget, outcome: Option<Outcome>) -> Self {
        Self {
            seq: 0,
            message,
            target,
            failure: None,
            outcome,
        }
    }

    pub(crate) fn complete(mut self, result: MessengerResult<()>) {
        if let Some(outcome) = self.outcome.take() {
            // The sender may have stopped waiting.
            let _ = outcome.send(result);
        }
    }
}

/// Scheduler-side record of one channel.
pub(crate) struct ChannelQueue {
    pub(crate) service: Option<String>,
    pub(crate) param: Option<String>,
    pub(crate) redirection: Option<String>,
    pub(crate) pending: VecDeque<PendingMessage>,
    /// Whether the channel currently sits in the active rotation.
    pub(crate) in_rotation: bool,
    pub(crate) closed: bool,
    pub(crate) resolution: Resolution,
    pub(crate) handle_alive: bool,
}

impl ChannelQueue {
    pub(crate) fn new(
        service: Option<String>,
        param: Option<String>,
        redirection: Option<String>,
        resolution: Resolution,
    ) -> Self {
        Self {
            service,
            param,
            redirection,
            pending: VecDeque::new(),
            in_rotation: false,
            closed: false,
            resolution,
            handle_alive: true,
        }
    }

    pub(crate) fn target(&self, service: Option<&str>, param: Option<&str>) -> MessageTarget {
        MessageTarget {
            service: service.map(str::to_string).or_else(|| self.service.clone()),
            param: param.map(str::to_string).or_else(|| self.param.clone()),
            redirection: self.redirection.clone(),
        }
    }

    pub(crate) fn is_full(&self, capacity: usize) -> bool {
        self.pending.len() >= capacity
    }
}

/// Channel view of the shared state.
///
/// The shared connection reports what the connection is doing; a channel
/// reports what it means for this channel's own queue.
pub(crate) fn project(
    shared: MessengerState,
    pending: usize,
    full: bool,
    closed: bool,
) -> MessengerState {
    use MessengerState::*;

    if shared.is_terminal() {
        return shared;
    }

    if closed {
        return match (pending, shared.is(StateMask::RESOLVED)) {
            (0, _) => Closed,
            (_, true) => Closing,
            (_, false) => ResolveClosing,
        };
    }

    if pending == 0 {
        return match shared {
            ResolvePending | ResolveSaturated => Resolving,
            Reconnecting | ReconnectSaturated => Disconnected,
            Sending | SendingSaturated => Connected,
            other => other,
        };
    }

    let busy = match shared {
        Unresolved | Resolving | ResolvePending | ResolveSaturated => ResolvePending,
        Connected | Sending | SendingSaturated => Sending,
        Disconnected | Reconnecting | ReconnectSaturated => Reconnecting,
        other => other,
    };

    if !full {
        return busy;
    }
    match busy {
        ResolvePending => ResolveSaturated,
        Sending => SendingSaturated,
        Reconnecting => ReconnectSaturated,
        other => other,
    }
}

/// Handle to a logical messenger multiplexed over a scheduler's connection.
pub struct Channel {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: ChannelId,
}

impl Channel {
    /// Identifier of this channel within its scheduler.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a message for the channel's default service and parameter and
    /// wait until it is delivered or failed.
    ///
    /// Waits for queue space while the channel is saturated.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed, the message bounced after
    /// its retry, or the connection failed first.
    pub async fn send(&self, message: Message) -> MessengerResult<()> {
        self.send_to(message, None, None).await
    }

    /// Like [`send`](Channel::send), overriding service and parameter.
    ///
    /// # Errors
    ///
    /// See [`send`](Channel::send).
    pub async fn send_to(
        &self,
        message: Message,
        service: Option<&str>,
        param: Option<&str>,
    ) -> MessengerResult<()> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.new_pending(message, service, param, Some(tx));

        loop {
            match self.shared.enqueue(self.id, pending) {
                Ok(()) => break,
                Err(Rejected {
                    error: MessengerError::Saturated { .. },
                    pending: returned,
                }) => {
                    pending = returned;
                    let capacity = self.shared.config.channel_queue_capacity;
                    let id = self.id;
                    self.shared
                        .wait_until(
                            |inner| match inner.work.channels.get(&id) {
                                Some(slot) => {
                                    !slot.is_full(capacity)
                                        || slot.closed
                                        || inner.work.input_closed
                                }
                                None => true,
                            },
                            None,
                        )
                        .await;
                }
                Err(rejected) => return Err(rejected.error),
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(MessengerError::Abandoned),
        }
    }

    /// Queue a message without waiting.
    ///
    /// Returns whether the message was accepted. An accepted message is
    /// delivered or failed later; its fate shows through
    /// [`state`](Channel::state).
    pub fn try_send(&self, message: Message) -> bool {
        self.try_send_to(message, None, None)
    }

    /// Like [`try_send`](Channel::try_send), overriding service and parameter.
    pub fn try_send_to(&self, message: Message, service: Option<&str>, param: Option<&str>) -> bool {
        let pending = self.new_pending(message, service, param, None);
        self.shared.enqueue(self.id, pending).is_ok()
    }

    fn new_pending(
        &self,
        message: Message,
        service: Option<&str>,
        param: Option<&str>,
        outcome: Option<Outcome>,
    ) -> PendingMessage {
        let target = {
            let inner = self.shared.lock();
            match inner.work.channels.get(&self.id) {
                Some(slot) => slot.target(service, param),
                None => MessageTarget::new(
                    service.map(str::to_string),
                    param.map(str::to_string),
                ),
            }
        };
        PendingMessage::new(Arc::new(message), target, outcome)
    }

    /// Ask for the shared connection to be established.
    ///
    /// If it is not established yet, this channel is registered to learn the
    /// outcome through [`resolution`](Channel::resolution).
    pub fn resolve(&self) {
        self.shared.resolve_channel(self.id);
    }

    /// Stop accepting messages on this channel. Queued messages still drain.
    ///
    /// The shared connection is not affected.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if let Some(slot) = inner.work.channels.get_mut(&self.id) {
            slot.closed = true;
        }
        drop(inner);
        self.shared.notify_changed();
    }

    /// Wait until this channel has nothing queued.
    ///
    /// An unusable connection stops the wait only once it is terminal. The
    /// closing states refuse new messages but still deliver queued ones, and
    /// every other unusable state ends in a terminal one.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::Unusable` if the connection terminated while
    /// messages were still queued.
    pub async fn flush(&self) -> MessengerResult<()> {
        let id = self.id;
        self.shared
            .wait_until(
                |inner| {
                    inner.engine.state().is_terminal()
                        || inner
                            .work
                            .channels
                            .get(&id)
                            .is_none_or(|slot| slot.pending.is_empty())
                },
                None,
            )
            .await;

        let inner = self.shared.lock();
        let empty = inner
            .work
            .channels
            .get(&id)
            .is_none_or(|slot| slot.pending.is_empty());
        if empty {
            Ok(())
        } else {
            Err(MessengerError::Unusable {
                state: inner.engine.state(),
            })
        }
    }

    /// Current state of this channel.
    pub fn state(&self) -> MessengerState {
        let inner = self.shared.lock();
        self.projected(&inner)
    }

    pub(crate) fn projected(&self, inner: &Inner) -> MessengerState {
        let shared = inner.engine.state();
        match inner.work.channels.get(&self.id) {
            Some(slot) => project(
                shared,
                slot.pending.len(),
                slot.is_full(self.shared.config.channel_queue_capacity),
                slot.closed,
            ),
            None => shared,
        }
    }

    /// Wait until this channel's state is in `mask`, or `timeout` elapses.
    ///
    /// Returns the state observed last. Include [`StateMask::TERMINAL`] in
    /// `mask` to avoid waiting for the full timeout on a dead connection.
    pub async fn wait_state(&self, mask: StateMask, timeout: Duration) -> MessengerState {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        self.shared
            .wait_until(|inner| self.projected(inner).is(mask), deadline)
            .await;
        self.state()
    }

    /// Address messages on this channel are sent to.
    pub fn destination_address(&self) -> EndpointAddress {
        let inner = self.shared.lock();
        match inner.work.channels.get(&self.id) {
            Some(slot) => self
                .shared
                .destination
                .with_overrides(slot.service.as_deref(), slot.param.as_deref()),
            None => self.shared.destination.clone(),
        }
    }

    /// Identity of the remote peer as vouched for by the transport, with this
    /// channel's service and parameter applied.
    ///
    /// `None` until the connection has been established once.
    pub fn logical_destination_address(&self) -> Option<EndpointAddress> {
        let inner = self.shared.lock();
        let logical = inner.work.logical_destination.as_ref()?;
        Some(match inner.work.channels.get(&self.id) {
            Some(slot) => logical.with_overrides(slot.service.as_deref(), slot.param.as_deref()),
            None => logical.clone(),
        })
    }

    /// Number of messages queued on this channel.
    pub fn pending(&self) -> usize {
        let inner = self.shared.lock();
        inner
            .work
            .channels
            .get(&self.id)
            .map_or(0, |slot| slot.pending.len())
    }

    /// Outcome of the last connection attempt this channel asked for.
    pub fn resolution(&self) -> Resolution {
        let inner = self.shared.lock();
        inner
            .work
            .channels
            .get(&self.id)
            .map_or(Resolution::Pending, |slot| slot.resolution)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("destination", &self.shared.destination)
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.abandon_channel(self.id);
    }
}
