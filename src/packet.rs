use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

use crate::ids::{ConnectionId, SeqNr};

const KIND_DATA: u8 = 0;
const KIND_ACK: u8 = 1;
const KIND_HANDSHAKE: u8 = 2;

/// The three packet variants of the protocol. Every packet starts with a kind byte and the
///  destination connection id, which is all the multiplexer needs for routing; the rest of
///  the layout is per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Ack(AckPacket),
    Handshake(HandshakePacket),
}

/// Sequenced application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub destination_id: ConnectionId,
    pub sequence_number: SeqNr,
    pub payload: Bytes,
}

/// Cumulative acknowledgement: every data packet with a sequence number strictly below
///  `ack_sequence_number` is acknowledged and may be dropped from the peer's send window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    pub destination_id: ConnectionId,
    pub ack_sequence_number: SeqNr,
}

/// Connection request / response. A request is addressed to the reserved id 0 and routed by
///  the receiving multiplexer to the matching responder socket; the response is addressed to
///  the initiator's id and carries the responder's id as `source_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    pub destination_id: ConnectionId,
    pub source_id: ConnectionId,
    pub initial_sequence_number: SeqNr,
}

impl Packet {
    pub fn destination_id(&self) -> ConnectionId {
        match self {
            Packet::Data(p) => p.destination_id,
            Packet::Ack(p) => p.destination_id,
            Packet::Handshake(p) => p.destination_id,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self {
            Packet::Data(p) => {
                buf.put_u8(KIND_DATA);
                buf.put_u32(p.destination_id.to_raw());
                buf.put_u32(p.sequence_number.to_raw());
                buf.put_slice(&p.payload);
            }
            Packet::Ack(p) => {
                buf.put_u8(KIND_ACK);
                buf.put_u32(p.destination_id.to_raw());
                buf.put_u32(p.ack_sequence_number.to_raw());
            }
            Packet::Handshake(p) => {
                buf.put_u8(KIND_HANDSHAKE);
                buf.put_u32(p.destination_id.to_raw());
                buf.put_u32(p.source_id.to_raw());
                buf.put_u32(p.initial_sequence_number.to_raw());
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        if buf.remaining() < 5 {
            bail!("datagram too short for a packet header");
        }
        let kind = buf.get_u8();
        let destination_id = ConnectionId::from_raw(buf.get_u32());

        match kind {
            KIND_DATA => {
                if buf.remaining() < 4 {
                    bail!("truncated data packet");
                }
                let sequence_number = SeqNr::from_raw(buf.get_u32());
                let payload = buf.copy_to_bytes(buf.remaining());
                Ok(Packet::Data(DataPacket {
                    destination_id,
                    sequence_number,
                    payload,
                }))
            }
            KIND_ACK => {
                if buf.remaining() < 4 {
                    bail!("truncated ack packet");
                }
                let ack_sequence_number = SeqNr::from_raw(buf.get_u32());
                Ok(Packet::Ack(AckPacket {
                    destination_id,
                    ack_sequence_number,
                }))
            }
            KIND_HANDSHAKE => {
                if buf.remaining() < 8 {
                    bail!("truncated handshake packet");
                }
                let source_id = ConnectionId::from_raw(buf.get_u32());
                let initial_sequence_number = SeqNr::from_raw(buf.get_u32());
                Ok(Packet::Handshake(HandshakePacket {
                    destination_id,
                    source_id,
                    initial_sequence_number,
                }))
            }
            other => bail!("unknown packet kind {}", other),
        }
    }
}
