use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tracing::{error, trace};

use crate::packet::Packet;

/// This is an abstraction for sending a datagram on a UDP socket, introduced to facilitate
///  mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            // best effort - an unsent packet looks like a lost packet to the peer
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}

/// Encodes packets and hands them to the underlying socket.
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub async fn send_packet(&self, to: SocketAddr, packet: &Packet) {
        let mut buf = BytesMut::new();
        packet.ser(&mut buf);
        self.socket.do_send_packet(to, &buf).await;
    }
}
