//! Shared scheduler state and the engine action adapter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerlink_core::{EndpointAddress, TransportBinding};
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelId, ChannelQueue, PendingMessage, Resolution};
use crate::config::{Fairness, MessengerConfig};
use crate::engine::{EngineActions, Event, StateEngine, transition};
use crate::error::{MessengerError, MessengerResult};
use crate::metrics::SchedulerMetrics;
use crate::state::{MessengerState, StateMask};

use super::worker;

/// Action waiting for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    Connect,
    Start,
}

/// How the resolving set holds a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hold {
    /// Forgotten if the handle is dropped with nothing queued.
    Weak,
    /// Kept until the resolution outcome has been delivered.
    Strong,
}

/// A message refused at enqueue time, handed back to the caller.
pub(crate) struct Rejected {
    pub(crate) error: MessengerError,
    pub(crate) pending: PendingMessage,
}

/// Everything guarded by the scheduler lock.
pub(crate) struct Inner {
    pub(crate) engine: StateEngine,
    pub(crate) work: WorkState,
}

/// Bookkeeping the engine actions operate on.
pub(crate) struct WorkState {
    pub(crate) input_closed: bool,
    pub(crate) channels: HashMap<ChannelId, ChannelQueue>,
    /// Channels with pending work, in service order.
    pub(crate) rotation: VecDeque<ChannelId>,
    pub(crate) resolving: HashMap<ChannelId, Hold>,
    pub(crate) deferred: Option<Deferred>,
    pub(crate) worker_running: bool,
    spawn_worker: bool,
    follow_ups: VecDeque<Event>,
    /// Peer identity observed on the first successful connection.
    pub(crate) logical_destination: Option<EndpointAddress>,
    pub(crate) ever_connected: bool,
    /// Message currently handed to the transport.
    pub(crate) in_flight: Option<(ChannelId, u64)>,
    next_channel: u64,
    next_seq: u64,
    pub(crate) metrics: SchedulerMetrics,
}

impl WorkState {
    fn new() -> Self {
        Self {
            input_closed: false,
            channels: HashMap::new(),
            rotation: VecDeque::new(),
            resolving: HashMap::new(),
            deferred: None,
            worker_running: false,
            spawn_worker: false,
            follow_ups: VecDeque::new(),
            logical_destination: None,
            ever_connected: false,
            in_flight: None,
            next_channel: 0,
            next_seq: 0,
            metrics: SchedulerMetrics::new(),
        }
    }

    pub(crate) fn any_full(&self, capacity: usize) -> bool {
        self.channels.values().any(|slot| slot.is_full(capacity))
    }

    fn defer(&mut self, action: Deferred, wake: &Notify) {
        self.deferred = Some(action);
        if self.worker_running {
            wake.notify_one();
        } else {
            self.spawn_worker = true;
        }
    }

    /// Take `id` out of the rotation once its queue is empty.
    pub(crate) fn leave_rotation(&mut self, id: ChannelId) {
        self.rotation.retain(|c| *c != id);
        if let Some(slot) = self.channels.get_mut(&id) {
            slot.in_rotation = false;
        }
        self.reap(id);
    }

    /// Forget `id` if its handle is gone and nothing keeps it alive.
    pub(crate) fn reap(&mut self, id: ChannelId) {
        let dead = match self.channels.get(&id) {
            Some(slot) => {
                !slot.handle_alive
                    && slot.pending.is_empty()
                    && self.resolving.get(&id) != Some(&Hold::Strong)
            }
            None => false,
        };
        if dead {
            self.channels.remove(&id);
            self.resolving.remove(&id);
            self.rotation.retain(|c| *c != id);
        }
    }

    /// Deliver `resolution` to every channel in the resolving set.
    pub(crate) fn release_resolving(&mut self, resolution: Resolution) {
        let ids: Vec<ChannelId> = self.resolving.drain().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(slot) = self.channels.get_mut(&id) {
                slot.resolution = resolution;
            }
            self.reap(id);
        }
    }

    /// Fail every queued message except the one in flight.
    pub(crate) fn fail_pending(&mut self, state: MessengerState) -> usize {
        let in_flight = self.in_flight;
        let mut failed = 0;

        for (id, slot) in self.channels.iter_mut() {
            let keep = match in_flight {
                Some((channel, seq)) if channel == *id => slot
                    .pending
                    .iter()
                    .position(|m| m.seq == seq)
                    .and_then(|at| slot.pending.remove(at)),
                _ => None,
            };
            for message in slot.pending.drain(..) {
                self.metrics.record_message_failed();
                message.complete(Err(MessengerError::ConnectionFailed { state }));
                failed += 1;
            }
            if let Some(message) = keep {
                slot.pending.push_back(message);
            }
        }

        let channels = &self.channels;
        self.rotation
            .retain(|id| channels.get(id).is_some_and(|slot| !slot.pending.is_empty()));
        for slot in self.channels.values_mut() {
            slot.in_rotation = !slot.pending.is_empty();
        }

        let ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in ids {
            self.reap(id);
        }
        failed
    }
}

/// Adapter handing engine actions to the scheduler for one `handle` call.
struct EngineContext<'a> {
    shared: &'a Shared,
    work: &'a mut WorkState,
    /// State the engine commits before running the action.
    target: MessengerState,
}

impl EngineActions for EngineContext<'_> {
    fn connect(&mut self) {
        self.work.defer(Deferred::Connect, &self.shared.wake);
    }

    fn start(&mut self) {
        self.work.defer(Deferred::Start, &self.shared.wake);
    }

    fn close_input(&mut self) {
        self.work.input_closed = true;
    }

    fn close_output(&mut self) {
        debug!(destination = %self.shared.destination, "closing connection");
        self.shared.transport.close_connection();
    }

    fn fail_all(&mut self) {
        let failed = self.work.fail_pending(self.target);
        if failed > 0 {
            info!(
                destination = %self.shared.destination,
                state = %self.target,
                failed,
                "failed pending messages"
            );
        }
        self.work.follow_ups.push_back(Event::Idle);
    }
}

/// State shared by the scheduler handle, its channels and the worker.
pub(crate) struct Shared {
    pub(crate) destination: EndpointAddress,
    pub(crate) transport: Arc<dyn TransportBinding>,
    pub(crate) config: MessengerConfig,
    runtime: Handle,
    inner: Mutex<Inner>,
    pub(crate) wake: Notify,
    changes: watch::Sender<u64>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake everyone waiting for a state or queue change.
    pub(crate) fn notify_changed(&self) {
        self.changes
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Feed `event` to the engine, then any follow-up events it produced.
    pub(crate) fn fire(self: &Arc<Self>, inner: &mut Inner, event: Event) {
        let mut next = Some(event);
        while let Some(event) = next {
            let Inner { engine, work } = inner;
            let (target, _) = transition(engine.state(), event);
            let mut ctx = EngineContext {
                shared: self,
                work: &mut *work,
                target,
            };
            engine.handle(event, &mut ctx);
            next = work.follow_ups.pop_front();
        }

        if inner.engine.state().is_terminal() && !inner.work.resolving.is_empty() {
            inner.work.release_resolving(Resolution::Failed);
        }

        if inner.work.spawn_worker {
            inner.work.spawn_worker = false;
            inner.work.worker_running = true;
            inner.work.metrics.record_worker_spawn();
            debug!(destination = %self.destination, "spawning messenger worker");
            self.runtime.spawn(worker::run(Arc::clone(self)));
        }

        self.notify_changed();
    }

    /// Wait until `pred` holds, re-checking after every change.
    ///
    /// Returns `false` if `deadline` passed first.
    pub(crate) async fn wait_until<F>(&self, mut pred: F, deadline: Option<Instant>) -> bool
    where
        F: FnMut(&Inner) -> bool,
    {
        let mut changes = self.changes.subscribe();
        loop {
            let done = pred(&*self.lock());
            if done {
                return true;
            }
            let changed = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, changes.changed()).await {
                        Ok(changed) => changed,
                        Err(_) => return false,
                    }
                }
                None => changes.changed().await,
            };
            if changed.is_err() {
                return false;
            }
        }
    }

    pub(crate) fn enqueue(
        self: &Arc<Self>,
        id: ChannelId,
        mut pending: PendingMessage,
    ) -> Result<(), Rejected> {
        let capacity = self.config.channel_queue_capacity;
        let mut inner = self.lock();
        let state = inner.engine.state();
        let work = &mut inner.work;

        let Some(slot) = work.channels.get_mut(&id) else {
            work.metrics.record_message_rejected();
            return Err(Rejected {
                error: MessengerError::InputClosed,
                pending,
            });
        };

        if work.input_closed || slot.closed || state.is_terminal() {
            work.metrics.record_message_rejected();
            return Err(Rejected {
                error: MessengerError::InputClosed,
                pending,
            });
        }

        if slot.is_full(capacity) {
            work.metrics.record_message_rejected();
            self.fire(&mut inner, Event::Saturated);
            return Err(Rejected {
                error: MessengerError::Saturated { capacity },
                pending,
            });
        }

        work.next_seq += 1;
        pending.seq = work.next_seq;
        slot.pending.push_back(pending);
        let filled = slot.is_full(capacity);
        if !slot.in_rotation {
            slot.in_rotation = true;
            work.rotation.push_back(id);
        }
        if !work.ever_connected {
            work.resolving.insert(id, Hold::Strong);
        }
        work.metrics.record_message_queued();
        debug!(destination = %self.destination, channel = id.0, "message queued");

        if !state.is(StateMask::SATURATED) || !work.any_full(capacity) {
            self.fire(&mut inner, Event::Msgs);
        }
        if filled {
            self.fire(&mut inner, Event::Saturated);
        }
        Ok(())
    }

    pub(crate) fn resolve_channel(self: &Arc<Self>, id: ChannelId) {
        let mut inner = self.lock();
        let state = inner.engine.state();
        let work = &mut inner.work;

        if state.is_terminal() {
            if let Some(slot) = work.channels.get_mut(&id) {
                slot.resolution = Resolution::Failed;
            }
            drop(inner);
            self.notify_changed();
            return;
        }

        if work.ever_connected {
            if let Some(slot) = work.channels.get_mut(&id) {
                slot.resolution = Resolution::Connected;
            }
        } else if let Some(slot) = work.channels.get_mut(&id) {
            slot.resolution = Resolution::Pending;
            work.resolving.entry(id).or_insert(Hold::Weak);
        }
        self.fire(&mut inner, Event::Resolve);
    }

    pub(crate) fn abandon_channel(&self, id: ChannelId) {
        let mut inner = self.lock();
        let work = &mut inner.work;
        let Some(slot) = work.channels.get_mut(&id) else {
            return;
        };
        slot.handle_alive = false;
        if slot.pending.is_empty() && work.resolving.get(&id) == Some(&Hold::Weak) {
            work.resolving.remove(&id);
        }
        work.reap(id);
        drop(inner);
        self.notify_changed();
    }
}

/// Multiplexes channels over one connection to a single destination.
///
/// The scheduler owns the connection's [`StateEngine`] and runs a background
/// worker on the Tokio runtime it was created in. Cloning the handle shares
/// the same scheduler.
#[derive(Clone)]
pub struct ChannelScheduler {
    shared: Arc<Shared>,
}

impl ChannelScheduler {
    /// Create a scheduler for `destination` over `transport`.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::NoRuntime` when called outside a Tokio
    /// runtime.
    pub fn new(
        destination: EndpointAddress,
        transport: Arc<dyn TransportBinding>,
        config: MessengerConfig,
    ) -> MessengerResult<Self> {
        let runtime = Handle::try_current().map_err(|_| MessengerError::NoRuntime)?;
        let (changes, _) = watch::channel(0);

        debug!(
            destination = %destination,
            capacity = config.channel_queue_capacity,
            fairness = ?config.fairness,
            "creating channel scheduler"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                destination,
                transport,
                config,
                runtime,
                inner: Mutex::new(Inner {
                    engine: StateEngine::new(),
                    work: WorkState::new(),
                }),
                wake: Notify::new(),
                changes,
            }),
        })
    }

    /// Open a channel over this scheduler's connection.
    ///
    /// `service` and `param` default to the destination's own. Ordering is
    /// only guaranteed within one channel.
    pub fn channel_messenger(
        &self,
        redirection: Option<&str>,
        service: Option<&str>,
        param: Option<&str>,
    ) -> Channel {
        let destination = &self.shared.destination;
        let mut inner = self.shared.lock();
        let work = &mut inner.work;
        work.next_channel += 1;
        let id = ChannelId(work.next_channel);
        work.channels.insert(
            id,
            ChannelQueue::new(
                service
                    .map(str::to_string)
                    .or_else(|| destination.service.clone()),
                param.map(str::to_string).or_else(|| destination.param.clone()),
                redirection.map(str::to_string),
                Resolution::Pending,
            ),
        );
        drop(inner);

        Channel {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    /// Request the connection.
    pub fn resolve(&self) {
        let mut inner = self.shared.lock();
        self.shared.fire(&mut inner, Event::Resolve);
    }

    /// Stop accepting messages and close once everything queued is sent.
    pub fn close(&self) {
        info!(destination = %self.shared.destination, "closing messenger");
        let mut inner = self.shared.lock();
        self.shared.fire(&mut inner, Event::Close);
    }

    /// Abandon the connection and fail everything queued.
    pub fn shutdown(&self) {
        info!(destination = %self.shared.destination, "shutting down messenger");
        let mut inner = self.shared.lock();
        self.shared.fire(&mut inner, Event::Shutdown);
    }

    /// Current state of the shared connection.
    pub fn state(&self) -> MessengerState {
        self.shared.lock().engine.state()
    }

    /// Wait until the connection state is in `mask`, or `timeout` elapses.
    ///
    /// Returns the state observed last. A `timeout` too large to represent,
    /// such as `Duration::MAX`, waits without a deadline.
    pub async fn wait_state(&self, mask: StateMask, timeout: Duration) -> MessengerState {
        let deadline = Instant::now().checked_add(timeout);
        self.shared
            .wait_until(|inner| inner.engine.state().is(mask), deadline)
            .await;
        self.state()
    }

    /// Address this scheduler dials.
    pub fn destination_address(&self) -> &EndpointAddress {
        &self.shared.destination
    }

    /// Peer identity observed on the first successful connection.
    pub fn logical_destination_address(&self) -> Option<EndpointAddress> {
        self.shared.lock().work.logical_destination.clone()
    }

    /// Snapshot of the scheduler's counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared.lock().work.metrics.clone()
    }

    /// Channels still registered, live handles and draining ones alike.
    pub fn channel_count(&self) -> usize {
        self.shared.lock().work.channels.len()
    }

    /// Scheduling policy in use.
    pub fn fairness(&self) -> Fairness {
        self.shared.config.fairness
    }
}

impl std::fmt::Debug for ChannelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelScheduler")
            .field("destination", &self.shared.destination)
            .field("state", &self.state())
            .finish()
    }
}
