use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, Instrument, Level};
use uuid::Uuid;

use crate::config::RudpConfig;
use crate::dispatcher::Dispatcher;
use crate::packet::Packet;
use crate::send_pipeline::SendPipeline;
use crate::socket::RudpSocket;

/// The parts of a multiplexer that sockets hold on to: the outbound pipeline, the routing
///  table and the shared configuration.
pub struct MuxShared {
    pub(crate) pipeline: SendPipeline,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: Arc<RudpConfig>,
}

/// One UDP endpoint carrying many logical connections.
///
/// The multiplexer owns the UDP socket. A background task receives datagrams, decodes them
///  and routes each to the socket addressed by its connection id; undecodable and
///  unroutable datagrams are dropped with a trace. Sockets are created through
///  [`new_socket`](RudpMultiplexer::new_socket) and stay tied to this multiplexer for their
///  lifetime.
pub struct RudpMultiplexer {
    shared: Arc<MuxShared>,
    local_addr: SocketAddr,
    recv_task: JoinHandle<()>,
}

impl RudpMultiplexer {
    pub async fn bind(addr: impl ToSocketAddrs, config: RudpConfig) -> anyhow::Result<RudpMultiplexer> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        info!("bound multiplexer to {:?}", local_addr);

        let shared = Arc::new(MuxShared {
            pipeline: SendPipeline::new(Arc::new(socket.clone())),
            dispatcher: Dispatcher::new(),
            config: Arc::new(config),
        });
        let recv_task = tokio::spawn(Self::recv_loop(socket, shared.clone()));

        Ok(RudpMultiplexer {
            shared,
            local_addr,
            recv_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Creates a socket on this multiplexer. The socket is not registered for routing until
    ///  a connect is started on it.
    pub fn new_socket(&self) -> RudpSocket {
        RudpSocket::new(self.shared.clone())
    }

    async fn recv_loop(socket: Arc<UdpSocket>, shared: Arc<MuxShared>) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "packet_received", ?correlation_id);

            let packet = {
                let _entered = span.enter();
                trace!("received {} bytes from {:?}", num_read, from);

                let parse_buf = &mut &buf[..num_read];
                match Packet::deser(parse_buf) {
                    Ok(packet) => packet,
                    Err(_) => {
                        debug!("received undecodable datagram from {:?} - dropping", from);
                        continue;
                    }
                }
            };

            shared.dispatcher.dispatch(packet, from).instrument(span).await;
        }
    }

    /// Stops receiving. Sockets remain usable for sending but will see no more inbound
    ///  traffic; dropping the multiplexer does the same.
    pub fn shut_down(&self) {
        self.recv_task.abort();
    }
}

impl Drop for RudpMultiplexer {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
