use std::cmp::min;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

use crate::completion::{Completion, CompletionSlot, TransportError};
use crate::ids::ConnectionId;
use crate::multiplexer::MuxShared;
use crate::packet::{AckPacket, DataPacket, HandshakePacket, Packet};
use crate::peer::Peer;
use crate::sender::Sender;
use crate::session::{Role, Session};

struct PendingWrite {
    remaining: Bytes,
    transferred: usize,
    slot: CompletionSlot<usize>,
}

struct PendingRead {
    region: BytesMut,
    capacity: usize,
    min_transfer: usize,
    slot: CompletionSlot<Bytes>,
}

struct SocketInner {
    session: Session,
    peer: Peer,
    sender: Sender,

    /// received application bytes awaiting a reader, bounded by the configured read buffer
    ///  capacity
    inbound: BytesMut,

    pending_connect: Option<CompletionSlot<()>>,
    pending_write: Option<PendingWrite>,
    pending_read: Option<PendingRead>,

    connect_resend_handle: Option<JoinHandle<()>>,
}

/// The shared per-connection state behind a [`RudpSocket`]. The dispatcher routes inbound
///  packets here through a weak reference; the owning socket handle is the only strong
///  owner.
pub struct SocketCore {
    mux: Arc<MuxShared>,

    /// mirror of the session's id, readable without the async lock so the socket's drop
    ///  handler can deregister from the dispatcher
    local_id: AtomicU32,

    inner: RwLock<SocketInner>,
}

impl SocketCore {
    pub fn new(mux: Arc<MuxShared>) -> SocketCore {
        let sender = Sender::new(
            mux.config.send_buffer_capacity,
            mux.config.max_payload_len,
            mux.config.effective_initial_seq(),
        );
        SocketCore {
            mux,
            local_id: AtomicU32::new(0),
            inner: RwLock::new(SocketInner {
                session: Session::new(),
                peer: Peer::default(),
                sender,
                inbound: BytesMut::new(),
                pending_connect: None,
                pending_write: None,
                pending_read: None,
                connect_resend_handle: None,
            }),
        }
    }

    pub async fn start_connect(self: &Arc<Self>, remote: SocketAddr) -> Completion<()> {
        let mut inner = self.inner.write().await;
        assert!(
            !inner.session.is_open(),
            "connect on a socket that is already open"
        );
        assert!(
            inner.pending_connect.is_none(),
            "a connect is already pending on this socket"
        );

        let (slot, completion) = Completion::pair();

        inner.peer.set_endpoint(Some(remote));
        inner.peer.set_id(ConnectionId::ZERO); // assigned when the handshake response arrives

        match self.mux.dispatcher.add_socket(Arc::downgrade(self)) {
            Ok(local_id) => {
                self.local_id.store(local_id.to_raw(), Ordering::Release);
                let initial_seq = inner.sender.next_sequence_number();
                inner.session.open(local_id, initial_seq, Role::Initiator);
                inner.pending_connect = Some(slot);

                let request = Packet::Handshake(HandshakePacket {
                    destination_id: ConnectionId::ZERO,
                    source_id: local_id,
                    initial_sequence_number: initial_seq,
                });
                self.mux.pipeline.send_packet(remote, &request).await;
                inner.connect_resend_handle = Some(self.spawn_connect_resend(remote, request));
            }
            Err(e) => slot.complete(Err(e)),
        }
        completion
    }

    /// The connection request is fire-and-forget on the wire, so it is re-sent while the
    ///  session stays in the opening state. The task holds only a weak reference - dropping
    ///  the socket ends it.
    fn spawn_connect_resend(self: &Arc<Self>, remote: SocketAddr, request: Packet) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let resend_interval = self.mux.config.connect_resend_interval;

        tokio::spawn(async move {
            loop {
                time::sleep(resend_interval).await;
                let Some(core) = weak.upgrade() else {
                    return;
                };
                let inner = core.inner.read().await;
                if !inner.session.is_opening() {
                    return;
                }
                trace!(
                    "socket {}: re-sending connection request to {:?}",
                    inner.session.id(),
                    remote
                );
                core.mux.pipeline.send_packet(remote, &request).await;
            }
        })
    }

    pub async fn start_accept(self: &Arc<Self>) -> Completion<()> {
        let mut inner = self.inner.write().await;
        assert!(
            !inner.session.is_open(),
            "connect on a socket that is already open"
        );
        assert!(
            inner.pending_connect.is_none(),
            "a connect is already pending on this socket"
        );
        assert!(
            inner.peer.endpoint().is_some() && !inner.peer.id().is_zero(),
            "responder connect requires a preset peer endpoint and id"
        );

        let (slot, completion) = Completion::pair();

        match self.mux.dispatcher.add_socket(Arc::downgrade(self)) {
            Ok(local_id) => {
                self.local_id.store(local_id.to_raw(), Ordering::Release);
                let initial_seq = inner.sender.next_sequence_number();
                inner.session.open(local_id, initial_seq, Role::Responder);
                inner.pending_connect = Some(slot);
            }
            Err(e) => slot.complete(Err(e)),
        }
        completion
    }

    pub async fn start_write(&self, data: &[u8]) -> Completion<usize> {
        let mut inner = self.inner.write().await;
        assert!(
            inner.pending_write.is_none(),
            "a write is already pending on this socket"
        );

        let (slot, completion) = Completion::pair();
        if data.is_empty() {
            slot.complete(Ok(0));
            return completion;
        }

        inner.pending_write = Some(PendingWrite {
            remaining: Bytes::copy_from_slice(data),
            transferred: 0,
            slot,
        });
        self.process_write(&mut inner).await;
        completion
    }

    pub async fn start_read(&self, len: usize, min_transfer: usize) -> Completion<Bytes> {
        let mut inner = self.inner.write().await;
        assert!(
            inner.pending_read.is_none(),
            "a read is already pending on this socket"
        );

        let (slot, completion) = Completion::pair();
        if len == 0 {
            slot.complete(Ok(Bytes::new()));
            return completion;
        }

        inner.pending_read = Some(PendingRead {
            region: BytesMut::with_capacity(len),
            capacity: len,
            min_transfer,
            slot,
        });
        Self::process_read(&mut inner);
        completion
    }

    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        self.do_close(&mut inner);
    }

    fn do_close(&self, inner: &mut SocketInner) {
        if inner.session.is_open() {
            self.mux.dispatcher.remove_socket(inner.session.id());
        }
        inner.session.close();
        inner.peer.reset();
        inner.sender.clear();
        inner.inbound.clear();

        if let Some(handle) = inner.connect_resend_handle.take() {
            handle.abort();
        }
        if let Some(slot) = inner.pending_connect.take() {
            slot.complete(Err(TransportError::OperationAborted));
        }
        if let Some(pending) = inner.pending_write.take() {
            pending.slot.complete(Err(TransportError::OperationAborted));
        }
        if let Some(pending) = inner.pending_read.take() {
            pending.slot.complete(Err(TransportError::OperationAborted));
        }
    }

    /// Moves as much of the pending write as fits into the sender, emits whatever became
    ///  ready, and completes the write once the whole region is absorbed.
    async fn process_write(&self, inner: &mut SocketInner) {
        let mut absorbed_any = false;
        {
            let Some(pending) = inner.pending_write.as_mut() else {
                return;
            };
            while !pending.remaining.is_empty() && inner.sender.free_space() > 0 {
                let absorbed = inner.sender.add_data(&pending.remaining);
                if absorbed == 0 {
                    break;
                }
                pending.remaining.advance(absorbed);
                pending.transferred += absorbed;
                absorbed_any = true;
            }
        }

        if absorbed_any {
            self.emit_ready(inner).await;
        }

        if inner.pending_write.as_ref().is_some_and(|p| p.remaining.is_empty()) {
            let pending = inner.pending_write.take().expect("pending write checked above");
            pending.slot.complete(Ok(pending.transferred));
        }
    }

    /// Frames and sends everything the sender has buffered. Bytes buffered before the
    ///  session is connected stay in the sender until the handshake completes.
    async fn emit_ready(&self, inner: &mut SocketInner) {
        if !inner.session.is_connected() {
            return;
        }
        let Some(endpoint) = inner.peer.endpoint() else {
            return;
        };
        let destination_id = inner.peer.id();

        for (seq, payload) in inner.sender.take_ready() {
            let packet = Packet::Data(DataPacket {
                destination_id,
                sequence_number: seq,
                payload,
            });
            self.mux.pipeline.send_packet(endpoint, &packet).await;
        }
    }

    /// Copies inbound bytes into the pending read region and completes the read once the
    ///  region is full or the minimum transfer is reached. A no-op until at least one byte
    ///  can be moved.
    fn process_read(inner: &mut SocketInner) {
        let Some(pending) = inner.pending_read.as_mut() else {
            return;
        };
        if inner.inbound.is_empty() {
            return;
        }

        let len = min(inner.inbound.len(), pending.capacity - pending.region.len());
        if len == 0 {
            return;
        }
        let chunk = inner.inbound.split_to(len);
        pending.region.extend_from_slice(&chunk);

        if pending.region.len() == pending.capacity || pending.region.len() >= pending.min_transfer {
            let pending = inner.pending_read.take().expect("pending read checked above");
            pending.slot.complete(Ok(pending.region.freeze()));
        }
    }

    pub async fn handle_receive(&self, packet: Packet, from: SocketAddr) {
        let mut inner = self.inner.write().await;
        match packet {
            Packet::Data(data) => self.handle_data(&mut inner, data).await,
            Packet::Ack(ack) => self.handle_ack(&mut inner, &ack).await,
            Packet::Handshake(handshake) => {
                self.handle_handshake(&mut inner, &handshake, from).await
            }
        }
    }

    async fn handle_data(&self, inner: &mut SocketInner, packet: DataPacket) {
        if !inner.session.is_connected() {
            trace!(
                "socket {}: data packet outside an established session - discarding",
                inner.session.id()
            );
            return;
        }
        if inner.inbound.len() + packet.payload.len() >= self.mux.config.read_buffer_capacity {
            debug!(
                "socket {}: data packet of {} bytes has no room in the inbound buffer - dropping",
                inner.session.id(),
                packet.payload.len()
            );
            return;
        }

        inner.inbound.extend_from_slice(&packet.payload);

        // cumulative ack so the peer can clear its send window
        if let Some(endpoint) = inner.peer.endpoint() {
            let ack = Packet::Ack(AckPacket {
                destination_id: inner.peer.id(),
                ack_sequence_number: packet.sequence_number.wrapping_next(),
            });
            self.mux.pipeline.send_packet(endpoint, &ack).await;
        }

        Self::process_read(inner);
    }

    async fn handle_ack(&self, inner: &mut SocketInner, packet: &AckPacket) {
        if !inner.session.is_connected() {
            trace!(
                "socket {}: ack outside an established session - discarding",
                inner.session.id()
            );
            return;
        }
        inner.sender.handle_ack(packet);
        self.process_write(inner).await;
    }

    async fn handle_handshake(
        &self,
        inner: &mut SocketInner,
        packet: &HandshakePacket,
        from: SocketAddr,
    ) {
        if let Some(expected) = inner.peer.endpoint() {
            if from != expected {
                debug!(
                    "socket {}: handshake from {:?} instead of the peer at {:?} - ignoring",
                    inner.session.id(),
                    from,
                    expected
                );
                return;
            }
        }

        if !inner.session.handle_handshake(packet, &mut inner.peer) {
            return;
        }

        if let Some(handle) = inner.connect_resend_handle.take() {
            handle.abort();
        }

        if inner.session.role() == Role::Responder {
            // respond so the initiator can bind our id and complete its own connect
            let reply = Packet::Handshake(HandshakePacket {
                destination_id: inner.peer.id(),
                source_id: inner.session.id(),
                initial_sequence_number: inner.session.initial_seq(),
            });
            if let Some(endpoint) = inner.peer.endpoint() {
                self.mux.pipeline.send_packet(endpoint, &reply).await;
            }
        }

        if let Some(slot) = inner.pending_connect.take() {
            slot.complete(Ok(()));
        }

        // flush bytes that were written while the handshake was still in flight
        self.emit_ready(inner).await;
        self.process_write(inner).await;
    }

    /// Whether this socket is the responder that a connection request addressed to the
    ///  reserved id 0 is meant for.
    pub async fn accepts_connection_request(
        &self,
        packet: &HandshakePacket,
        from: SocketAddr,
    ) -> bool {
        let inner = self.inner.read().await;
        inner.session.is_opening()
            && inner.session.role() == Role::Responder
            && inner.peer.endpoint() == Some(from)
            && inner.peer.id() == packet.source_id
    }

    fn registered_id(&self) -> ConnectionId {
        ConnectionId::from_raw(self.local_id.load(Ordering::Acquire))
    }
}

/// A logical connection multiplexed over a [`crate::RudpMultiplexer`]'s UDP socket.
///
/// All operations return immediately; connect, read and write each hand back a
///  [`Completion`] that resolves when the operation finishes or the socket is closed. At
///  most one operation of each kind may be pending at a time - starting a second one is a
///  caller bug and panics.
pub struct RudpSocket {
    core: Arc<SocketCore>,
}

impl RudpSocket {
    pub(crate) fn new(mux: Arc<MuxShared>) -> RudpSocket {
        RudpSocket {
            core: Arc::new(SocketCore::new(mux)),
        }
    }

    pub async fn id(&self) -> ConnectionId {
        self.core.inner.read().await.session.id()
    }

    pub async fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.core.inner.read().await.peer.endpoint()
    }

    pub async fn remote_id(&self) -> ConnectionId {
        self.core.inner.read().await.peer.id()
    }

    pub async fn is_open(&self) -> bool {
        self.core.inner.read().await.session.is_open()
    }

    pub async fn is_connected(&self) -> bool {
        self.core.inner.read().await.session.is_connected()
    }

    /// Presets the remote endpoint and id. This is the responder-side half of connection
    ///  setup: some rendezvous mechanism outside this crate tells both sides about each
    ///  other, and the responder records the expected peer here before calling
    ///  [`start_accept`](RudpSocket::start_accept).
    pub async fn set_peer(&self, endpoint: SocketAddr, id: ConnectionId) {
        let mut inner = self.core.inner.write().await;
        inner.peer.set_endpoint(Some(endpoint));
        inner.peer.set_id(id);
    }

    /// Starts connecting to `remote` as the initiator. The completion resolves once the
    ///  handshake response is processed, or with `OperationAborted` when the socket is
    ///  closed first.
    pub async fn start_connect(&self, remote: SocketAddr) -> Completion<()> {
        self.core.start_connect(remote).await
    }

    /// Starts the responder side of connection setup. The peer endpoint and id must have
    ///  been preset via [`set_peer`](RudpSocket::set_peer).
    pub async fn start_accept(&self) -> Completion<()> {
        self.core.start_accept().await
    }

    /// Copies `data` into the socket's send buffer, as far as it fits; the completion
    ///  resolves with the region length once every byte has been absorbed. A zero-length
    ///  write completes immediately.
    pub async fn start_write(&self, data: &[u8]) -> Completion<usize> {
        self.core.start_write(data).await
    }

    /// Starts reading up to `len` bytes. The completion resolves once the region is full or
    ///  at least `min_transfer` bytes have been transferred, whichever happens first, and
    ///  carries the received bytes. A zero-length read completes immediately.
    pub async fn start_read(&self, len: usize, min_transfer: usize) -> Completion<Bytes> {
        self.core.start_read(len, min_transfer).await
    }

    /// Closes the socket: deregisters it from the multiplexer, drops buffered data in both
    ///  directions and cancels all pending operations with `OperationAborted`.
    pub async fn close(&self) {
        self.core.close().await
    }
}

impl Drop for RudpSocket {
    fn drop(&mut self) {
        // close() may have deregistered already - removal is idempotent
        let id = self.core.registered_id();
        if !id.is_zero() {
            self.core.mux.dispatcher.remove_socket(id);
        }
    }
}
