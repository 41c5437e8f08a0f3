use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::completion::TransportError;
use crate::ids::ConnectionId;
use crate::packet::Packet;
use crate::socket::SocketCore;

/// The routing table of a multiplexer: connection id to socket.
///
/// Sockets are owned by their creators; the dispatcher only holds weak routing references,
///  so a socket that is dropped without being closed simply stops being routable.
pub struct Dispatcher {
    inner: Mutex<DispatcherInner>,
}

struct DispatcherInner {
    sockets: FxHashMap<ConnectionId, Weak<SocketCore>>,
    next_id: u32,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            inner: Mutex::new(DispatcherInner {
                sockets: FxHashMap::default(),
                next_id: rand::rng().random_range(1..=u32::MAX),
            }),
        }
    }

    #[cfg(test)]
    pub fn with_next_id(next_id: u32) -> Dispatcher {
        Dispatcher {
            inner: Mutex::new(DispatcherInner {
                sockets: FxHashMap::default(),
                next_id,
            }),
        }
    }

    /// Allocates a fresh nonzero connection id and records the socket under it. Ids come
    ///  from an incrementing counter, skipping 0 and ids that are still live.
    pub fn add_socket(&self, socket: Weak<SocketCore>) -> Result<ConnectionId, TransportError> {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");

        // drop mappings whose socket has gone away, so their ids become allocatable again
        inner.sockets.retain(|_, socket| socket.strong_count() > 0);

        if inner.sockets.len() >= (u32::MAX as usize) {
            return Err(TransportError::ResourceExhausted);
        }

        loop {
            let candidate = inner.next_id;
            inner.next_id = inner.next_id.wrapping_add(1);
            if candidate == 0 {
                continue;
            }
            let id = ConnectionId::from_raw(candidate);
            if inner.sockets.contains_key(&id) {
                continue;
            }
            inner.sockets.insert(id, socket);
            return Ok(id);
        }
    }

    /// Removes the mapping for `id`. Removing an unknown id is a no-op: `close` and the
    ///  socket's drop handler may both get here.
    pub fn remove_socket(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.sockets.remove(&id);
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<SocketCore>> {
        let inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.sockets.get(&id).and_then(Weak::upgrade)
    }

    fn live_sockets(&self) -> Vec<Arc<SocketCore>> {
        let inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.sockets.values().filter_map(Weak::upgrade).collect()
    }

    /// Routes a decoded packet to the socket addressed by its destination id.
    ///
    /// Packets addressed to the reserved id 0 are connection requests: they are delivered to
    ///  the (unique) responder socket that is waiting for exactly this peer. Anything
    ///  unroutable is discarded - stray and stale datagrams never produce errors upstream.
    pub async fn dispatch(&self, packet: Packet, from: SocketAddr) {
        let destination_id = packet.destination_id();

        if destination_id.is_zero() {
            if let Packet::Handshake(handshake) = &packet {
                let handshake = handshake.clone();
                for socket in self.live_sockets() {
                    if socket.accepts_connection_request(&handshake, from).await {
                        socket.handle_receive(packet, from).await;
                        return;
                    }
                }
            }
            debug!(
                "no socket waiting for a connection request from {:?} - discarding",
                from
            );
            return;
        }

        match self.lookup(destination_id) {
            Some(socket) => socket.handle_receive(packet, from).await,
            None => trace!(
                "received packet for unknown connection {} from {:?} - discarding",
                destination_id,
                from
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RudpConfig;
    use crate::ids::SeqNr;
    use crate::multiplexer::MuxShared;
    use crate::packet::{AckPacket, HandshakePacket};
    use crate::send_pipeline::{MockSendSocket, SendPipeline};

    fn test_mux() -> Arc<MuxShared> {
        Arc::new(MuxShared {
            pipeline: SendPipeline::new(Arc::new(MockSendSocket::new())),
            dispatcher: Dispatcher::new(),
            config: Arc::new(RudpConfig::default_ipv4()),
        })
    }

    fn test_socket(mux: &Arc<MuxShared>) -> Arc<SocketCore> {
        Arc::new(SocketCore::new(mux.clone()))
    }

    #[tokio::test]
    async fn test_add_socket_allocates_distinct_nonzero_ids() {
        let mux = test_mux();
        let dispatcher = Dispatcher::with_next_id(0);

        let a = test_socket(&mux);
        let b = test_socket(&mux);
        let id_a = dispatcher.add_socket(Arc::downgrade(&a)).unwrap();
        let id_b = dispatcher.add_socket(Arc::downgrade(&b)).unwrap();

        // the counter started at the reserved id, which must be skipped
        assert_eq!(id_a, ConnectionId::from_raw(1));
        assert_eq!(id_b, ConnectionId::from_raw(2));
    }

    #[tokio::test]
    async fn test_add_socket_wraps_around_the_id_space() {
        let mux = test_mux();
        let dispatcher = Dispatcher::with_next_id(u32::MAX);

        let a = test_socket(&mux);
        let b = test_socket(&mux);
        assert_eq!(
            dispatcher.add_socket(Arc::downgrade(&a)).unwrap(),
            ConnectionId::from_raw(u32::MAX)
        );
        assert_eq!(
            dispatcher.add_socket(Arc::downgrade(&b)).unwrap(),
            ConnectionId::from_raw(1)
        );
    }

    #[tokio::test]
    async fn test_lookup_and_remove() {
        let mux = test_mux();
        let dispatcher = Dispatcher::with_next_id(1);

        let socket = test_socket(&mux);
        let id = dispatcher.add_socket(Arc::downgrade(&socket)).unwrap();
        assert!(dispatcher.lookup(id).is_some());

        dispatcher.remove_socket(id);
        assert!(dispatcher.lookup(id).is_none());

        // removing again is a no-op
        dispatcher.remove_socket(id);
        dispatcher.remove_socket(ConnectionId::from_raw(12345));
    }

    #[tokio::test]
    async fn test_lookup_of_dropped_socket_is_empty() {
        let mux = test_mux();
        let dispatcher = Dispatcher::with_next_id(1);

        let socket = test_socket(&mux);
        let id = dispatcher.add_socket(Arc::downgrade(&socket)).unwrap();
        drop(socket);

        assert!(dispatcher.lookup(id).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_id_is_discarded() {
        let dispatcher = Dispatcher::new();
        let from = SocketAddr::from(([127, 0, 0, 1], 9));

        dispatcher
            .dispatch(
                Packet::Ack(AckPacket {
                    destination_id: ConnectionId::from_raw(42),
                    ack_sequence_number: SeqNr::from_raw(1),
                }),
                from,
            )
            .await;
    }

    #[tokio::test]
    async fn test_dispatch_of_unmatched_connection_request_is_discarded() {
        let dispatcher = Dispatcher::new();
        let from = SocketAddr::from(([127, 0, 0, 1], 9));

        dispatcher
            .dispatch(
                Packet::Handshake(HandshakePacket {
                    destination_id: ConnectionId::ZERO,
                    source_id: ConnectionId::from_raw(3),
                    initial_sequence_number: SeqNr::from_raw(1),
                }),
                from,
            )
            .await;
    }
}
