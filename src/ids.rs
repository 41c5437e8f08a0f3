use std::fmt::{Display, Formatter};

use rand::Rng;

/// Identifier of a logical connection, unique per multiplexer. The id 0 is reserved: it is
///  never assigned to a socket, and connection request packets are addressed to it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ConnectionId(u32);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConnectionId {
    pub const ZERO: ConnectionId = ConnectionId(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Sequence number of a data packet inside one session.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SeqNr(u32);

impl Display for SeqNr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNr {
    pub const ZERO: SeqNr = SeqNr(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// A random per-session starting point. Kept well below `u32::MAX` so that sequence
    ///  arithmetic does not wrap for any realistic session lifetime.
    pub fn random_seed() -> SeqNr {
        SeqNr(rand::rng().random_range(1..(1u32 << 30)))
    }

    pub fn next(self) -> SeqNr {
        SeqNr(
            self.0
                .checked_add(1)
                .expect("sequence number space exhausted"),
        )
    }

    /// Successor with wrap-around, for acknowledging sequence numbers taken from the wire:
    ///  a crafted packet must not be able to trigger an overflow panic.
    pub fn wrapping_next(self) -> SeqNr {
        SeqNr(self.0.wrapping_add(1))
    }
}
