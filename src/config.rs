use std::time::Duration;

use anyhow::bail;

use crate::ids::SeqNr;

pub struct RudpConfig {
    /// Upper bound (in bytes) for each socket's inbound buffer of received but not yet read
    ///  application data. A data packet whose payload would take the buffer to this size or
    ///  beyond is dropped, relying on the peer to re-send once the reader has drained the
    ///  buffer and acks start flowing again.
    pub read_buffer_capacity: usize,

    /// Upper bound (in bytes) for each socket's outbound buffer, counting both bytes that are
    ///  buffered but not yet sent and bytes that are on the wire awaiting acknowledgement.
    ///  This is the bound against which writes exert back-pressure.
    pub send_buffer_capacity: usize,

    /// The maximum payload carried by a single data packet.
    ///
    /// RUDP does not discover the MTU; the application is responsible for choosing a value
    ///  that fits the network path. With full Ethernet frames and no optional IP headers the
    ///  UDP payload is `1500 - 20 - 8 = 1472` for IPV4, minus the data packet header of 9
    ///  bytes.
    pub max_payload_len: usize,

    /// Starting point for each session's packet sequence numbers. `None` draws a fresh random
    ///  seed per socket; fixing a value is intended for tests.
    pub initial_seq: Option<SeqNr>,

    /// Interval at which an unanswered connection request is re-sent while a session is
    ///  still opening. There is no give-up point: callers that want a connect timeout arm
    ///  their own timer and close the socket.
    pub connect_resend_interval: Duration,
}

impl RudpConfig {
    pub fn default_ipv4() -> RudpConfig {
        RudpConfig {
            read_buffer_capacity: 64 * 1024,
            send_buffer_capacity: 64 * 1024,
            max_payload_len: 1463,
            initial_seq: None,
            connect_resend_interval: Duration::from_millis(100),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.read_buffer_capacity == 0 {
            bail!("read buffer capacity must be positive");
        }
        if self.send_buffer_capacity == 0 {
            bail!("send buffer capacity must be positive");
        }
        if self.max_payload_len == 0 {
            bail!("max payload length must be positive");
        }
        Ok(())
    }

    pub(crate) fn effective_initial_seq(&self) -> SeqNr {
        self.initial_seq.unwrap_or_else(SeqNr::random_seed)
    }
}
