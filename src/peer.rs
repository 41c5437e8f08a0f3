use std::net::SocketAddr;

use crate::ids::ConnectionId;

/// The remote half of a connection: the peer's UDP endpoint and its connection id.
///
/// Both start out unset. The endpoint is set before a connect is started (by the initiator
///  itself, or by whoever pre-configures a responder socket); the id is either preset on the
///  responder side or learned from the handshake response on the initiator side.
#[derive(Debug, Default)]
pub struct Peer {
    endpoint: Option<SocketAddr>,
    id: ConnectionId,
}

impl Peer {
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn set_endpoint(&mut self, endpoint: Option<SocketAddr>) {
        self.endpoint = endpoint;
    }

    pub fn set_id(&mut self, id: ConnectionId) {
        self.id = id;
    }

    pub fn reset(&mut self) {
        self.endpoint = None;
        self.id = ConnectionId::ZERO;
    }
}
