//! Background worker executing deferred `connect` and `start` actions.
//!
//! One worker task exists per scheduler at most. It is spawned when an
//! action is deferred while no worker runs, and exits after
//! `worker_idle_timeout` without new work.

use std::sync::Arc;

use peerlink_core::{EndpointAddress, Message, MessageTarget, TransportError, TransportResult};
use tracing::{debug, info, warn};

use crate::channel::{ChannelId, Resolution};
use crate::config::Fairness;
use crate::engine::Event;
use crate::error::MessengerError;
use crate::state::{MessengerState, StateMask};

use super::core::{Deferred, Inner, Shared};

/// States in which the send loop keeps draining.
const DRAINING: StateMask = StateMask::of(&[
    MessengerState::Sending,
    MessengerState::SendingSaturated,
    MessengerState::Closing,
]);

pub(crate) async fn run(shared: Arc<Shared>) {
    debug!(destination = %shared.destination, "messenger worker started");

    loop {
        let action = shared.lock().work.deferred.take();
        match action {
            Some(Deferred::Connect) => connect(&shared).await,
            Some(Deferred::Start) => send_loop(&shared).await,
            None => {
                let idle = shared.config.worker_idle_timeout;
                if tokio::time::timeout(idle, shared.wake.notified())
                    .await
                    .is_err()
                {
                    let mut inner = shared.lock();
                    if inner.work.deferred.is_none() {
                        inner.work.worker_running = false;
                        break;
                    }
                }
            }
        }
    }

    debug!(destination = %shared.destination, "messenger worker idle, exiting");
}

async fn connect(shared: &Arc<Shared>) {
    let reconnect = {
        let inner = shared.lock();
        if inner.engine.state().is_terminal() {
            return;
        }
        inner.work.ever_connected
    };

    let delay = shared.config.reconnect_delay;
    if reconnect && !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = abandoned(shared) => {
                debug!(destination = %shared.destination, "reconnect abandoned");
                return;
            }
        }
    }

    {
        let mut inner = shared.lock();
        if inner.engine.state().is_terminal() {
            return;
        }
        inner.work.metrics.record_connection_attempt();
    }

    debug!(destination = %shared.destination, reconnect, "connecting");
    let attempt = tokio::time::timeout(shared.config.connect_timeout, shared.transport.connect());
    let result = tokio::select! {
        result = attempt => result.unwrap_or(Err(TransportError::TimedOut)),
        _ = abandoned(shared) => {
            shared.transport.close_connection();
            Err(TransportError::Closed)
        }
    };

    let mut inner = shared.lock();
    if inner.engine.state().is_terminal() {
        // Shut down while the dial was completing. `Up` closes the output.
        let event = if result.is_ok() { Event::Up } else { Event::Down };
        shared.fire(&mut inner, event);
        return;
    }
    let outcome = result.and_then(|()| verify_identity(shared, &inner));

    let event = match outcome {
        Ok(identity) => {
            inner.work.metrics.record_connection_success();
            inner.work.ever_connected = true;
            info!(destination = %shared.destination, peer = %identity, "connection established");
            inner.work.logical_destination = Some(identity);
            Event::Up
        }
        Err(TransportError::IdentityMismatch { expected, actual }) => {
            shared.transport.close_connection();
            inner.work.metrics.record_identity_mismatch();
            warn!(
                destination = %shared.destination,
                %expected,
                %actual,
                "peer identity mismatch, dropping connection"
            );
            Event::Down
        }
        Err(error) => {
            inner.work.metrics.record_connection_failure();
            info!(destination = %shared.destination, %error, "connection attempt failed");
            Event::Down
        }
    };

    shared.fire(&mut inner, event);

    let state = inner.engine.state();
    if event == Event::Up && !state.is_terminal() && !inner.work.resolving.is_empty() {
        inner.work.release_resolving(Resolution::Connected);
        drop(inner);
        shared.notify_changed();
    }
}

/// Resolves once the connection has reached a terminal state.
async fn abandoned(shared: &Shared) {
    shared
        .wait_until(|inner| inner.engine.state().is_terminal(), None)
        .await;
}

/// Identity the transport vouches for, checked against what is expected.
fn verify_identity(shared: &Shared, inner: &Inner) -> TransportResult<EndpointAddress> {
    let actual = shared
        .transport
        .logical_peer()
        .map_or_else(|| shared.destination.base(), |peer| peer.base());

    let expected = inner
        .work
        .logical_destination
        .as_ref()
        .or(shared.config.expected_peer.as_ref());

    match expected {
        Some(expected) if !expected.same_peer(&actual) => Err(TransportError::IdentityMismatch {
            expected: expected.base(),
            actual,
        }),
        _ => Ok(actual),
    }
}

async fn send_loop(shared: &Arc<Shared>) {
    loop {
        let (id, seq, message, target) = {
            let mut inner = shared.lock();
            let state = inner.engine.state();

            if !state.is(DRAINING) {
                shared.fire(&mut inner, Event::Down);
                let state = inner.engine.state();
                if state.is_terminal() {
                    inner.work.fail_pending(state);
                    drop(inner);
                    shared.notify_changed();
                }
                return;
            }

            match next_message(&mut inner) {
                Some(next) => next,
                None => {
                    shared.fire(&mut inner, Event::Idle);
                    return;
                }
            }
        };

        let result = shared.transport.send_one(&message, &target).await;

        let keep_going = {
            let mut inner = shared.lock();
            inner.work.in_flight = None;
            let keep_going = match result {
                Ok(()) => {
                    message_sent(shared, &mut inner, id, seq);
                    true
                }
                Err(error) => message_failed(shared, &mut inner, id, seq, error),
            };
            drop(inner);
            shared.notify_changed();
            keep_going
        };

        if !keep_going {
            return;
        }
    }
}

type Next = (ChannelId, u64, Arc<Message>, MessageTarget);

/// Head message of the first channel in the rotation with pending work.
fn next_message(inner: &mut Inner) -> Option<Next> {
    let work = &mut inner.work;
    while let Some(&id) = work.rotation.front() {
        match work.channels.get(&id).and_then(|slot| slot.pending.front()) {
            Some(head) => {
                let next = (id, head.seq, Arc::clone(&head.message), head.target.clone());
                work.in_flight = Some((id, head.seq));
                return Some(next);
            }
            None => work.leave_rotation(id),
        }
    }
    None
}

fn message_sent(shared: &Arc<Shared>, inner: &mut Inner, id: ChannelId, seq: u64) {
    let capacity = shared.config.channel_queue_capacity;
    let work = &mut inner.work;
    let Some(slot) = work.channels.get_mut(&id) else {
        return;
    };

    if slot.pending.front().is_some_and(|m| m.seq == seq) {
        if let Some(message) = slot.pending.pop_front() {
            work.metrics.record_message_sent();
            debug!(destination = %shared.destination, channel = id.0, seq, "message sent");
            message.complete(Ok(()));
        }
    }

    if slot.pending.is_empty() {
        work.leave_rotation(id);
    } else if shared.config.fairness == Fairness::RoundRobin && work.rotation.front() == Some(&id) {
        work.rotation.rotate_left(1);
    }

    desaturate(shared, inner, capacity);
}

/// Returns whether the send loop should continue.
fn message_failed(
    shared: &Arc<Shared>,
    inner: &mut Inner,
    id: ChannelId,
    seq: u64,
    error: TransportError,
) -> bool {
    let capacity = shared.config.channel_queue_capacity;
    let work = &mut inner.work;
    let Some(slot) = work.channels.get_mut(&id) else {
        return true;
    };
    let Some(head) = slot.pending.front_mut().filter(|m| m.seq == seq) else {
        return true;
    };

    if head.failure.is_none() {
        debug!(destination = %shared.destination, channel = id.0, seq, %error, "send failed, keeping message for one retry");
        head.failure = Some(error);
        work.metrics.record_message_retried();
        shared.fire(inner, Event::Down);
        return false;
    }

    if let Some(message) = slot.pending.pop_front() {
        work.metrics.record_message_bounced();
        warn!(destination = %shared.destination, channel = id.0, seq, %error, "message bounced after retry");
        message.complete(Err(MessengerError::SendFailed(error)));
    }
    if slot.pending.is_empty() {
        work.leave_rotation(id);
    }
    desaturate(shared, inner, capacity);
    true
}

/// Leave the saturated state once no channel is full anymore.
fn desaturate(shared: &Arc<Shared>, inner: &mut Inner, capacity: usize) {
    if inner.engine.state().is(StateMask::SATURATED) && !inner.work.any_full(capacity) {
        shared.fire(inner, Event::Msgs);
    }
}
