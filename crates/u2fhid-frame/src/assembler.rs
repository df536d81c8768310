//! Packet-at-a-time frame reassembly.

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{unwrap_continuation_packet, unwrap_initial_packet, Frame, PacketLayout};
use crate::error::{FrameError, Result};

/// Reassembles one frame from packets fed one at a time.
///
/// The initial packet fixes channel, command and total length; every
/// continuation packet must follow on the same channel with the next
/// sequence number.
#[derive(Debug)]
pub struct FrameAssembler {
    layout: PacketLayout,
    channel: u32,
    command: u8,
    total_len: usize,
    next_sequence: u8,
    buf: BytesMut,
}

impl FrameAssembler {
    /// Start reassembly from an initial packet.
    pub fn start(
        layout: PacketLayout,
        expected_channel: u32,
        expected_command: u8,
        packet: &[u8],
    ) -> Result<Self> {
        let (total_len, lead) =
            unwrap_initial_packet(layout, expected_channel, expected_command, packet)?;

        let mut buf = BytesMut::with_capacity(total_len);
        buf.extend_from_slice(lead);

        Ok(Self {
            layout,
            channel: expected_channel,
            command: packet[4],
            total_len,
            next_sequence: 0,
            buf,
        })
    }

    /// Feed the next continuation packet.
    pub fn push(&mut self, packet: &[u8]) -> Result<()> {
        if self.is_complete() {
            return Err(FrameError::Malformed("packet after frame completed"));
        }

        let data = unwrap_continuation_packet(self.layout, self.channel, self.next_sequence, packet)?;
        let take = self.remaining().min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        trace!(
            sequence = self.next_sequence,
            received = self.buf.len(),
            total = self.total_len,
            "continuation packet"
        );
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Ok(())
    }

    /// True once every declared payload byte has arrived.
    pub fn is_complete(&self) -> bool {
        self.buf.len() >= self.total_len
    }

    /// Payload bytes still missing.
    pub fn remaining(&self) -> usize {
        self.total_len - self.buf.len()
    }

    /// Total packets this frame occupies, the initial one included.
    pub fn packets_expected(&self) -> usize {
        self.layout.packets_for(self.total_len)
    }

    /// Declared payload length.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Consume the assembler and yield the frame.
    pub fn finish(self) -> Result<Frame> {
        if !self.is_complete() {
            return Err(FrameError::Malformed("frame truncated"));
        }
        Ok(Frame {
            channel: self.channel,
            command: self.command,
            payload: self.buf.freeze(),
        })
    }
}
