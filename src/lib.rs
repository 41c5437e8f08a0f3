//! A reliable, connection-oriented datagram transport layered over UDP.
//!
//! Many logical connections share a single UDP endpoint. Each connection is identified by a
//!  32-bit connection id that is unique per multiplexer; the multiplexer receives datagrams,
//!  decodes them and routes each packet to the socket its destination id names. On top of
//!  that routing, every socket runs a small state machine (closed, opening, connected) and a
//!  pair of bounded byte buffers that give applications stream-style reads and writes with
//!  back-pressure.
//!
//! ## Design goals
//!
//! * One listening UDP socket per node, shared by all connections - multiplexing happens via
//!   connection ids tunneled through a single port
//! * Non-blocking operations throughout: `start_connect`, `start_read` and `start_write`
//!   return immediately, and the caller awaits a per-operation completion handle
//! * Bounded memory on both sides: the send buffer caps unsent plus unacknowledged bytes
//!   (this is what writes block on), and the inbound buffer caps received but unread bytes
//!   (data packets that would overflow it are dropped and left to the peer to re-send)
//! * Robustness against stray traffic: undecodable datagrams, handshakes that do not match
//!   the session state, and acks outside the send window are swallowed with a trace and can
//!   never tear down a connection
//! * Timeouts are the caller's business - a connect or read that should not wait forever is
//!   abandoned by closing the socket, which cancels all pending operations
//!
//! ## Connection setup
//!
//! Connection setup is asymmetric. The initiator knows the responder's UDP endpoint and
//!  sends a connection request addressed to the reserved id 0; the responder has been told
//!  the initiator's endpoint and id out of band (by whatever rendezvous mechanism the
//!  application uses), and answers with a handshake carrying its own id. Once each side has
//!  processed the other's handshake, both sessions are connected.
//!
//! ## Wire format
//!
//! Packet layout - all numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  packet kind (u8): 0 = data, 1 = ack, 2 = handshake
//! 1:  destination connection id (u32)
//!
//! data packets:
//! 5:  packet sequence number (u32)
//! 9:  payload, at most the configured max payload length
//!
//! ack packets:
//! 5:  cumulative ack (u32) - all sequence numbers below this one are acknowledged
//!
//! handshake packets:
//! 5:  source connection id (u32)
//! 9:  initial packet sequence number (u32)
//! ```
//!
//! ## Related:
//! * UDT
//!   * dedicated UDP socket per peer, this crate shares one socket across connections
//!   * same general shape: handshake, sequenced data, ack-driven send window
//! * QUIC
//!   * enforces encryption and carries stream multiplexing inside one connection
//!   * far richer (and heavier) loss recovery and congestion machinery

mod completion;
mod config;
mod dispatcher;
mod ids;
mod multiplexer;
mod packet;
mod peer;
mod send_pipeline;
mod sender;
mod session;
mod socket;

pub use completion::{Completion, TransportError};
pub use config::RudpConfig;
pub use ids::{ConnectionId, SeqNr};
pub use multiplexer::RudpMultiplexer;
pub use packet::{AckPacket, DataPacket, HandshakePacket, Packet};
pub use socket::RudpSocket;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
