use tracing::{debug, trace};

use crate::ids::{ConnectionId, SeqNr};
use crate::packet::HandshakePacket;
use crate::peer::Peer;

/// Which side of the handshake this session plays.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Role {
    /// Actively connects to a remote endpoint and learns the peer's id from the handshake
    ///  response.
    Initiator,
    /// Waits for a connection request from a peer whose endpoint and id were preset.
    Responder,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum SessionState {
    Closed,
    Opening,
    Connected,
}

/// The per-connection state machine: `Closed` until opened, `Opening` while the handshake is
///  in flight, `Connected` once a valid handshake was processed, and back to `Closed` on
///  close.
///
/// Invalid inbound handshakes never change state - stray or malformed datagrams must not be
///  able to destabilize a session.
#[derive(Debug)]
pub struct Session {
    local_id: ConnectionId,
    role: Role,
    initial_seq: SeqNr,
    state: SessionState,
}

impl Session {
    pub fn new() -> Session {
        Session {
            local_id: ConnectionId::ZERO,
            role: Role::Initiator,
            initial_seq: SeqNr::ZERO,
            state: SessionState::Closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.local_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn initial_seq(&self) -> SeqNr {
        self.initial_seq
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn is_opening(&self) -> bool {
        self.state == SessionState::Opening
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn open(&mut self, local_id: ConnectionId, initial_seq: SeqNr, role: Role) {
        self.local_id = local_id;
        self.initial_seq = initial_seq;
        self.role = role;
        self.state = SessionState::Opening;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Validates an inbound handshake against the session's role and, on success, binds the
    ///  peer's id (if not yet known) and moves the session to `Connected`. Returns whether
    ///  that transition happened; invalid handshakes are swallowed.
    pub fn handle_handshake(&mut self, packet: &HandshakePacket, peer: &mut Peer) -> bool {
        if self.state != SessionState::Opening {
            trace!(
                "session {} received a handshake outside the opening state - ignoring",
                self.local_id
            );
            return false;
        }

        match self.role {
            Role::Initiator => {
                if packet.source_id.is_zero() {
                    debug!(
                        "session {} received a handshake response without a source id - ignoring",
                        self.local_id
                    );
                    return false;
                }
                if peer.id().is_zero() {
                    peer.set_id(packet.source_id);
                } else if peer.id() != packet.source_id {
                    debug!(
                        "session {} received a handshake response from unexpected id {} - ignoring",
                        self.local_id, packet.source_id
                    );
                    return false;
                }
            }
            Role::Responder => {
                if packet.source_id != peer.id() {
                    debug!(
                        "session {} received a connection request from id {} instead of the preset peer {} - ignoring",
                        self.local_id,
                        packet.source_id,
                        peer.id()
                    );
                    return false;
                }
            }
        }

        self.state = SessionState::Connected;
        true
    }
}
