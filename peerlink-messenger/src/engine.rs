//! Finite state engine governing one messenger connection.
//!
//! The engine is pure transition logic. It owns nothing but the current
//! state; every side effect is delegated to an [`EngineActions`]
//! implementation supplied by the owner on each call.
//!
//! # Action contract
//!
//! - `connect` and `start` are long-running. The owner must only *schedule*
//!   them and report completion later through [`Event::Up`], [`Event::Down`]
//!   or [`Event::Idle`]. They must never feed an event back inline.
//! - `close_input`, `close_output` and `fail_all` run synchronously inside
//!   [`StateEngine::handle`]. `fail_all` must arrange for a later
//!   [`Event::Idle`].
//!
//! The engine is not reentrant: the owner serializes calls to `handle`
//! behind one lock and must not call `handle` from within an action.
//!
//! # Transition table
//!
//! The table is a single immutable `static` shared by every engine. Each
//! engine only stores an index into it.

use crate::state::MessengerState;

/// Input events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Event {
    /// Connection requested.
    Resolve = 0,
    /// A message became available.
    Msgs,
    /// Local buffering is full.
    Saturated,
    /// Graceful shutdown requested.
    Close,
    /// Forced shutdown requested.
    Shutdown,
    /// Connection attempt succeeded.
    Up,
    /// Connection attempt or send failed.
    Down,
    /// No pending work remains.
    Idle,
}

impl Event {
    /// Number of events.
    pub const COUNT: usize = 8;

    /// Every event, in declaration order.
    pub const ALL: [Event; Self::COUNT] = [
        Event::Resolve,
        Event::Msgs,
        Event::Saturated,
        Event::Close,
        Event::Shutdown,
        Event::Up,
        Event::Down,
        Event::Idle,
    ];
}

/// Side effect attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// No effect.
    Nop,
    /// Establish the connection; completes with `Up` or `Down`.
    Connect,
    /// Drain pending messages; completes with `Down` or `Idle`.
    Start,
    /// Stop accepting new messages.
    CloseInput,
    /// Force the connection closed.
    CloseOutput,
    /// Fail every pending message; completes with `Idle`.
    FailAll,
    /// `CloseInput` then `CloseOutput`.
    CloseInputOutput,
    /// `CloseInput` then `FailAll`.
    CloseInputFailAll,
}

/// Effects the owner of a [`StateEngine`] implements.
pub trait EngineActions {
    /// Schedule a connection attempt.
    fn connect(&mut self);

    /// Schedule draining of the pending queues.
    fn start(&mut self);

    /// Refuse further messages.
    fn close_input(&mut self);

    /// Force-terminate the underlying connection.
    fn close_output(&mut self);

    /// Fail every pending message and schedule an `Idle` event.
    fn fail_all(&mut self);
}

impl Action {
    /// Run this action against `actions`.
    pub fn perform<A: EngineActions + ?Sized>(self, actions: &mut A) {
        match self {
            Action::Nop => {}
            Action::Connect => actions.connect(),
            Action::Start => actions.start(),
            Action::CloseInput => actions.close_input(),
            Action::CloseOutput => actions.close_output(),
            Action::FailAll => actions.fail_all(),
            Action::CloseInputOutput => {
                actions.close_input();
                actions.close_output();
            }
            Action::CloseInputFailAll => {
                actions.close_input();
                actions.fail_all();
            }
        }
    }
}

type Row = [(MessengerState, Action); Event::COUNT];

use Action::{
    CloseInput as CIN, CloseInputFailAll as CLF, CloseInputOutput as CIO, CloseOutput as COUT,
    Connect as CONN, FailAll as FAIL, Nop as NOP, Start as START,
};
use MessengerState::*;

/// Terminal rows ignore every event but `Up`, which closes the late connection.
const fn terminal(s: MessengerState) -> Row {
    [
        (s, NOP),
        (s, NOP),
        (s, NOP),
        (s, NOP),
        (s, NOP),
        (s, COUT),
        (s, NOP),
        (s, NOP),
    ]
}

// Columns: resolve, msgs, saturated, close, shutdown, up, down, idle.
static TRANSITIONS: [Row; MessengerState::COUNT] = [
    // Unresolved
    [
        (Resolving, CONN),
        (ResolvePending, CONN),
        (ResolveSaturated, CONN),
        (Closed, CIN),
        (Broken, CIN),
        (Connected, NOP),
        (Unresolved, NOP),
        (Unresolved, NOP),
    ],
    // ResolvePending
    [
        (ResolvePending, NOP),
        (ResolvePending, NOP),
        (ResolveSaturated, NOP),
        (ResolveClosing, CIN),
        (Broken, CLF),
        (Sending, START),
        (Unresolvable, CLF),
        (Resolving, NOP),
    ],
    // Resolving
    [
        (Resolving, NOP),
        (ResolvePending, NOP),
        (ResolveSaturated, NOP),
        (Closed, CIN),
        (Broken, CIN),
        (Connected, NOP),
        (Unresolvable, CIN),
        (Resolving, NOP),
    ],
    // ResolveSaturated
    [
        (ResolveSaturated, NOP),
        (ResolvePending, NOP),
        (ResolveSaturated, NOP),
        (ResolveClosing, CIN),
        (Broken, CLF),
        (SendingSaturated, START),
        (Unresolvable, CLF),
        (Resolving, NOP),
    ],
    // Connected
    [
        (Connected, NOP),
        (Sending, START),
        (SendingSaturated, START),
        (Closed, CIO),
        (Broken, CIO),
        (Connected, NOP),
        (Disconnected, NOP),
        (Connected, NOP),
    ],
    // Disconnected
    [
        (Disconnected, NOP),
        (Reconnecting, CONN),
        (ReconnectSaturated, CONN),
        (Closed, CIN),
        (Broken, CIN),
        (Connected, NOP),
        (Disconnected, NOP),
        (Disconnected, NOP),
    ],
    // Reconnecting
    [
        (Reconnecting, NOP),
        (Reconnecting, NOP),
        (ReconnectSaturated, NOP),
        (ReconnectClosing, CIN),
        (Broken, CLF),
        (Sending, START),
        (Broken, CLF),
        (Disconnected, NOP),
    ],
    // ReconnectSaturated
    [
        (ReconnectSaturated, NOP),
        (Reconnecting, NOP),
        (ReconnectSaturated, NOP),
        (ReconnectClosing, CIN),
        (Broken, CLF),
        (SendingSaturated, START),
        (Broken, CLF),
        (Disconnected, NOP),
    ],
    // Sending
    [
        (Sending, NOP),
        (Sending, NOP),
        (SendingSaturated, NOP),
        (Closing, CIN),
        (Disconnecting, CIO),
        (Sending, NOP),
        (Reconnecting, CONN),
        (Connected, NOP),
    ],
    // SendingSaturated
    [
        (SendingSaturated, NOP),
        (Sending, NOP),
        (SendingSaturated, NOP),
        (Closing, CIN),
        (Disconnecting, CIO),
        (SendingSaturated, NOP),
        (ReconnectSaturated, CONN),
        (Connected, NOP),
    ],
    // ResolveClosing
    [
        (ResolveClosing, NOP),
        (ResolveClosing, NOP),
        (ResolveClosing, NOP),
        (ResolveClosing, NOP),
        (Broken, FAIL),
        (Closing, START),
        (Unresolvable, FAIL),
        (ResolveClosing, NOP),
    ],
    // ReconnectClosing
    [
        (ReconnectClosing, NOP),
        (ReconnectClosing, NOP),
        (ReconnectClosing, NOP),
        (ReconnectClosing, NOP),
        (Broken, FAIL),
        (Closing, START),
        (Broken, FAIL),
        (ReconnectClosing, NOP),
    ],
    // Closing. A send failing while draining re-dials so the queue can
    // still drain; `Down` here must not leave messages stranded.
    [
        (Closing, NOP),
        (Closing, NOP),
        (Closing, NOP),
        (Closing, NOP),
        (Disconnecting, COUT),
        (ReconnectClosing, CONN),
        (ReconnectClosing, CONN),
        (Closed, COUT),
    ],
    // Disconnecting
    [
        (Disconnecting, NOP),
        (Disconnecting, NOP),
        (Disconnecting, NOP),
        (Disconnecting, NOP),
        (Disconnecting, NOP),
        (Disconnecting, NOP),
        (Broken, FAIL),
        (Broken, NOP),
    ],
    terminal(Unresolvable),
    terminal(Closed),
    terminal(Broken),
];

/// Look up the transition for `(state, event)` without applying it.
pub fn transition(state: MessengerState, event: Event) -> (MessengerState, Action) {
    TRANSITIONS[state.index()][event as usize]
}

/// Per-messenger state engine.
#[derive(Debug, Clone)]
pub struct StateEngine {
    state: MessengerState,
}

impl Default for StateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEngine {
    /// Create an engine in [`MessengerState::Unresolved`].
    pub fn new() -> Self {
        Self {
            state: MessengerState::Unresolved,
        }
    }

    /// Current state.
    pub fn state(&self) -> MessengerState {
        self.state
    }

    /// Apply `event`, performing the transition's action before returning.
    ///
    /// The new state is committed before the action runs, so actions observe
    /// the state they lead to.
    pub fn handle<A: EngineActions + ?Sized>(
        &mut self,
        event: Event,
        actions: &mut A,
    ) -> MessengerState {
        let (next, action) = transition(self.state, event);
        if next != self.state {
            tracing::trace!(from = %self.state, to = %next, ?event, ?action, "messenger transition");
        }
        self.state = next;
        action.perform(actions);
        next
    }
}
