use std::cmp::min;
use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::ids::SeqNr;
use crate::packet::AckPacket;

/// The outbound half of a connection: a bounded byte buffer feeding a window of in-flight
///  packets.
///
/// Capacity accounting spans both stages - bytes that are buffered but not yet framed into a
///  packet, and payload bytes that are on the wire awaiting a cumulative ack. `free_space`
///  is what is left of the configured capacity, and is what write back-pressure is measured
///  against: it shrinks as data is added and recovers only as acks arrive.
pub struct Sender {
    capacity: usize,
    max_payload_len: usize,
    next_seq: SeqNr,
    unsent: BytesMut,
    in_flight: BTreeMap<SeqNr, Bytes>,
    in_flight_bytes: usize,
}

impl Sender {
    pub fn new(capacity: usize, max_payload_len: usize, initial_seq: SeqNr) -> Sender {
        Sender {
            capacity,
            max_payload_len,
            next_seq: initial_seq,
            unsent: BytesMut::new(),
            in_flight: BTreeMap::new(),
            in_flight_bytes: 0,
        }
    }

    /// Returns the current sequence number and advances the counter.
    pub fn next_sequence_number(&mut self) -> SeqNr {
        let seq = self.next_seq;
        self.next_seq = seq.next();
        seq
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.unsent.len() - self.in_flight_bytes
    }

    /// Copies as much of `data` as currently fits into the send buffer, returning the number
    ///  of bytes absorbed (possibly zero). Never blocks.
    pub fn add_data(&mut self, data: &[u8]) -> usize {
        let len = min(self.free_space(), data.len());
        self.unsent.extend_from_slice(&data[..len]);
        len
    }

    /// Frames all buffered bytes into payload chunks of at most the configured payload
    ///  length, moving them into the in-flight window. The caller is responsible for putting
    ///  the returned chunks on the wire.
    pub fn take_ready(&mut self) -> Vec<(SeqNr, Bytes)> {
        let mut ready = Vec::new();
        while !self.unsent.is_empty() {
            let len = min(self.max_payload_len, self.unsent.len());
            let payload = self.unsent.split_to(len).freeze();
            let seq = self.next_sequence_number();

            self.in_flight_bytes += payload.len();
            self.in_flight.insert(seq, payload.clone());
            ready.push((seq, payload));
        }
        ready
    }

    /// Processes a cumulative ack: drops every in-flight packet below the acked sequence
    ///  number, recovering buffer space. Acks beyond the send window and duplicate acks are
    ///  ignored.
    pub fn handle_ack(&mut self, packet: &AckPacket) {
        if packet.ack_sequence_number > self.next_seq {
            debug!(
                "ack for {} is beyond the send window - ignoring",
                packet.ack_sequence_number
            );
            return;
        }

        while let Some((&seq, _)) = self.in_flight.first_key_value() {
            if seq >= packet.ack_sequence_number {
                break;
            }
            let payload = self
                .in_flight
                .remove(&seq)
                .expect("first_key_value just returned this key");
            self.in_flight_bytes -= payload.len();
            trace!("packet {} acknowledged ({} bytes)", seq, payload.len());
        }
    }

    /// Drops all buffered and in-flight bytes. Called when the session closes.
    pub fn clear(&mut self) {
        self.unsent.clear();
        self.in_flight.clear();
        self.in_flight_bytes = 0;
    }
}
