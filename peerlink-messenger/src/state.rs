//! Externally observable messenger states.
//!
//! Each [`MessengerState`] is a distinct bit so that composite predicates
//! ("still usable", "terminal", ...) are plain bit sets. [`StateMask`] is
//! that bit set.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Lifecycle state of a messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessengerState {
    /// Never connected, nothing pending.
    Unresolved = 0,
    /// Connecting with messages waiting.
    ResolvePending,
    /// Connecting with nothing pending.
    Resolving,
    /// Connecting with local buffering full.
    ResolveSaturated,
    /// Connected and idle.
    Connected,
    /// Was connected, connection lost, nothing pending.
    Disconnected,
    /// Re-establishing a lost connection with messages waiting.
    Reconnecting,
    /// Re-establishing a lost connection with local buffering full.
    ReconnectSaturated,
    /// Draining pending messages.
    Sending,
    /// Draining pending messages with local buffering full.
    SendingSaturated,
    /// Closed for input while still resolving; will drain once connected.
    ResolveClosing,
    /// Closed for input while reconnecting; will drain once connected.
    ReconnectClosing,
    /// Closed for input and draining.
    Closing,
    /// Shut down while a send was in progress.
    Disconnecting,
    /// Could never connect. Terminal.
    Unresolvable,
    /// Closed after draining. Terminal.
    Closed,
    /// Connection failed and could not be repaired, or shut down. Terminal.
    Broken,
}

impl MessengerState {
    /// Number of states.
    pub const COUNT: usize = 17;

    /// Every state, in declaration order.
    pub const ALL: [MessengerState; Self::COUNT] = [
        MessengerState::Unresolved,
        MessengerState::ResolvePending,
        MessengerState::Resolving,
        MessengerState::ResolveSaturated,
        MessengerState::Connected,
        MessengerState::Disconnected,
        MessengerState::Reconnecting,
        MessengerState::ReconnectSaturated,
        MessengerState::Sending,
        MessengerState::SendingSaturated,
        MessengerState::ResolveClosing,
        MessengerState::ReconnectClosing,
        MessengerState::Closing,
        MessengerState::Disconnecting,
        MessengerState::Unresolvable,
        MessengerState::Closed,
        MessengerState::Broken,
    ];

    /// Index of this state in [`MessengerState::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The single bit representing this state.
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Whether this state belongs to `mask`.
    pub const fn is(self, mask: StateMask) -> bool {
        mask.0 & self.bit() != 0
    }

    /// May still accept messages.
    pub const fn is_usable(self) -> bool {
        self.is(StateMask::USABLE)
    }

    /// Will never change again.
    pub const fn is_terminal(self) -> bool {
        self.is(StateMask::TERMINAL)
    }
}

impl fmt::Display for MessengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessengerState::Unresolved => "UNRESOLVED",
            MessengerState::ResolvePending => "RESOLVE_PENDING",
            MessengerState::Resolving => "RESOLVING",
            MessengerState::ResolveSaturated => "RESOLVE_SATURATED",
            MessengerState::Connected => "CONNECTED",
            MessengerState::Disconnected => "DISCONNECTED",
            MessengerState::Reconnecting => "RECONNECTING",
            MessengerState::ReconnectSaturated => "RECONNECT_SATURATED",
            MessengerState::Sending => "SENDING",
            MessengerState::SendingSaturated => "SENDING_SATURATED",
            MessengerState::ResolveClosing => "RESOLVE_CLOSING",
            MessengerState::ReconnectClosing => "RECONNECT_CLOSING",
            MessengerState::Closing => "CLOSING",
            MessengerState::Disconnecting => "DISCONNECTING",
            MessengerState::Unresolvable => "UNRESOLVABLE",
            MessengerState::Closed => "CLOSED",
            MessengerState::Broken => "BROKEN",
        };
        f.write_str(name)
    }
}

/// Set of messenger states.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateMask(u32);

impl StateMask {
    /// No state.
    pub const EMPTY: StateMask = StateMask(0);

    /// Every state.
    pub const ANY: StateMask = StateMask((1 << MessengerState::COUNT as u32) - 1);

    /// States that may still accept messages.
    pub const USABLE: StateMask = StateMask::of(&[
        MessengerState::Unresolved,
        MessengerState::ResolvePending,
        MessengerState::Resolving,
        MessengerState::ResolveSaturated,
        MessengerState::Connected,
        MessengerState::Disconnected,
        MessengerState::Reconnecting,
        MessengerState::ReconnectSaturated,
        MessengerState::Sending,
        MessengerState::SendingSaturated,
    ]);

    /// States reached only after a connection was established at least once.
    pub const RESOLVED: StateMask = StateMask::of(&[
        MessengerState::Connected,
        MessengerState::Disconnected,
        MessengerState::Reconnecting,
        MessengerState::ReconnectSaturated,
        MessengerState::Sending,
        MessengerState::SendingSaturated,
        MessengerState::ResolveClosing,
        MessengerState::ReconnectClosing,
        MessengerState::Closing,
        MessengerState::Disconnecting,
        MessengerState::Closed,
        MessengerState::Broken,
    ]);

    /// States that never change again.
    pub const TERMINAL: StateMask = StateMask::of(&[
        MessengerState::Unresolvable,
        MessengerState::Closed,
        MessengerState::Broken,
    ]);

    /// States with no message pending.
    pub const IDLE: StateMask = StateMask::of(&[
        MessengerState::Unresolved,
        MessengerState::Connected,
        MessengerState::Disconnected,
        MessengerState::Unresolvable,
        MessengerState::Closed,
        MessengerState::Broken,
    ]);

    /// States where local buffering is full.
    pub const SATURATED: StateMask = StateMask::of(&[
        MessengerState::ResolveSaturated,
        MessengerState::ReconnectSaturated,
        MessengerState::SendingSaturated,
    ]);

    /// Build a mask from a list of states.
    pub const fn of(states: &[MessengerState]) -> StateMask {
        let mut bits = 0;
        let mut i = 0;
        while i < states.len() {
            bits |= states[i].bit();
            i += 1;
        }
        StateMask(bits)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `state` is in this mask.
    pub const fn contains(self, state: MessengerState) -> bool {
        state.is(self)
    }

    /// Whether the two masks share any state.
    pub const fn intersects(self, other: StateMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the mask is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the states in this mask.
    pub fn states(self) -> impl Iterator<Item = MessengerState> {
        MessengerState::ALL
            .into_iter()
            .filter(move |s| self.contains(*s))
    }
}

impl From<MessengerState> for StateMask {
    fn from(state: MessengerState) -> Self {
        StateMask(state.bit())
    }
}

impl BitOr for StateMask {
    type Output = StateMask;

    fn bitor(self, rhs: StateMask) -> StateMask {
        StateMask(self.0 | rhs.0)
    }
}

impl BitOr<MessengerState> for StateMask {
    type Output = StateMask;

    fn bitor(self, rhs: MessengerState) -> StateMask {
        StateMask(self.0 | rhs.bit())
    }
}

impl BitOr for MessengerState {
    type Output = StateMask;

    fn bitor(self, rhs: MessengerState) -> StateMask {
        StateMask(self.bit() | rhs.bit())
    }
}

impl BitOrAssign for StateMask {
    fn bitor_assign(&mut self, rhs: StateMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StateMask {
    type Output = StateMask;

    fn bitand(self, rhs: StateMask) -> StateMask {
        StateMask(self.0 & rhs.0)
    }
}

impl Not for StateMask {
    type Output = StateMask;

    fn not(self) -> StateMask {
        StateMask(!self.0 & StateMask::ANY.0)
    }
}

impl fmt::Debug for StateMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.states()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessengerState::*;

    #[test]
    fn test_bits_are_distinct() {
        let mut seen = 0u32;
        for state in MessengerState::ALL {
            assert_eq!(seen & state.bit(), 0, "{} reuses a bit", state);
            seen |= state.bit();
        }
        assert_eq!(seen, StateMask::ANY.bits());
    }

    #[test]
    fn test_index_matches_all_order() {
        for (i, state) in MessengerState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }

    #[test]
    fn test_composite_membership() {
        let expect = |s: MessengerState, u: bool, r: bool, t: bool, i: bool, sat: bool| {
            assert_eq!(s.is(StateMask::USABLE), u, "{} usable", s);
            assert_eq!(s.is(StateMask::RESOLVED), r, "{} resolved", s);
            assert_eq!(s.is(StateMask::TERMINAL), t, "{} terminal", s);
            assert_eq!(s.is(StateMask::IDLE), i, "{} idle", s);
            assert_eq!(s.is(StateMask::SATURATED), sat, "{} saturated", s);
        };

        expect(Unresolved, true, false, false, true, false);
        expect(ResolvePending, true, false, false, false, false);
        expect(Resolving, true, false, false, false, false);
        expect(ResolveSaturated, true, false, false, false, true);
        expect(Connected, true, true, false, true, false);
        expect(Disconnected, true, true, false, true, false);
        expect(Reconnecting, true, true, false, false, false);
        expect(ReconnectSaturated, true, true, false, false, true);
        expect(Sending, true, true, false, false, false);
        expect(SendingSaturated, true, true, false, false, true);
        expect(ResolveClosing, false, true, false, false, false);
        expect(ReconnectClosing, false, true, false, false, false);
        expect(Closing, false, true, false, false, false);
        expect(Disconnecting, false, true, false, false, false);
        expect(Unresolvable, false, false, true, true, false);
        expect(Closed, false, true, true, true, false);
        expect(Broken, false, true, true, true, false);
    }

    #[test]
    fn test_terminal_is_never_usable() {
        assert!(!StateMask::TERMINAL.intersects(StateMask::USABLE));
        assert_eq!(StateMask::TERMINAL & StateMask::IDLE, StateMask::TERMINAL);
    }

    #[test]
    fn test_mask_operators() {
        let mask = Connected | Closed;
        assert!(mask.contains(Connected));
        assert!(mask.contains(Closed));
        assert!(!mask.contains(Broken));
        assert_eq!((mask | Broken).states().count(), 3);
        assert!((!mask).contains(Broken));
        assert!(!(!mask).contains(Connected));
        assert!(StateMask::EMPTY.is_empty());
    }
}
