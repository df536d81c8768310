use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::assembler::FrameAssembler;
use crate::channel::{command_name, TYPE_INIT, U2FHID_ERROR};
use crate::error::{FrameError, Result};

/// Initial packet header: channel (4) + command (1) + length (2) = 7 bytes.
pub const INITIAL_HEADER_SIZE: usize = 7;

/// Continuation packet header: channel (4) + sequence (1) = 5 bytes.
pub const CONTINUATION_HEADER_SIZE: usize = 5;

/// Full-speed HID report size.
pub const DEFAULT_PACKET_SIZE: usize = 64;

/// Smallest packet that still carries one payload byte after the initial header.
pub const MIN_PACKET_SIZE: usize = INITIAL_HEADER_SIZE + 1;

/// Largest supported packet size.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Highest continuation sequence number (7 bits).
pub const MAX_SEQUENCE: u8 = 0x7f;

/// A logical U2FHID message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel the message travels on.
    pub channel: u32,
    /// Command byte, always with [`TYPE_INIT`] set.
    pub command: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame. The command's high bit is forced on.
    pub fn new(channel: u32, command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            command: command | TYPE_INIT,
            payload: payload.into(),
        }
    }

    /// Fragment this frame into packets.
    pub fn to_packets(&self, layout: PacketLayout) -> Result<BytesMut> {
        let mut dst = BytesMut::new();
        wrap_frame(layout, self.channel, self.command, &self.payload, &mut dst)?;
        Ok(dst)
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_size(&self, layout: PacketLayout) -> usize {
        layout.packets_for(self.payload.len()) * layout.packet_size()
    }
}

/// Packet geometry derived from the HID report size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    packet_size: usize,
}

impl PacketLayout {
    /// Validate `packet_size` and build a layout for it.
    pub fn new(packet_size: usize) -> Result<Self> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(FrameError::InvalidPacketSize {
                size: packet_size,
                min: MIN_PACKET_SIZE,
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(Self { packet_size })
    }

    /// Size of every packet in bytes.
    pub const fn packet_size(self) -> usize {
        self.packet_size
    }

    /// Payload bytes carried by the initial packet.
    pub const fn initial_capacity(self) -> usize {
        self.packet_size - INITIAL_HEADER_SIZE
    }

    /// Payload bytes carried by each continuation packet.
    pub const fn continuation_capacity(self) -> usize {
        self.packet_size - CONTINUATION_HEADER_SIZE
    }

    /// Largest payload a single frame can carry.
    ///
    /// Bounded by the 16-bit length field and by the 128 continuation
    /// packets a 7-bit sequence number can address. 7609 bytes at 64-byte
    /// packets.
    pub fn max_payload_len(self) -> usize {
        let addressable =
            self.initial_capacity() + (MAX_SEQUENCE as usize + 1) * self.continuation_capacity();
        addressable.min(u16::MAX as usize)
    }

    /// Number of packets needed for a payload of `total_len` bytes.
    pub fn packets_for(self, total_len: usize) -> usize {
        frames_expected(
            total_len,
            self.initial_capacity(),
            self.continuation_capacity(),
        )
    }
}

impl Default for PacketLayout {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

/// Header fields of an initial packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialHeader {
    pub channel: u32,
    pub command: u8,
    /// Declared payload length of the whole frame.
    pub total_len: usize,
}

/// Number of packets needed for `total_len` payload bytes, given the initial
/// capacity `c0` and continuation capacity `c1`.
pub fn frames_expected(total_len: usize, c0: usize, c1: usize) -> usize {
    if total_len <= c0 {
        1
    } else {
        1 + (total_len - c0).div_ceil(c1.max(1))
    }
}

/// Fragment a payload into packets appended to `dst`.
///
/// Wire format (64-byte packets):
/// ```text
/// initial:      ┌────────────┬─────────────┬───────────┬──────────────┐
///               │ CID (4B BE)│ CMD|0x80 (1)│ LEN (2B BE)│ DATA (57B)  │
///               └────────────┴─────────────┴───────────┴──────────────┘
/// continuation: ┌────────────┬─────────────┬──────────────────────────┐
///               │ CID (4B BE)│ SEQ 0..0x7F │ DATA (59B)               │
///               └────────────┴─────────────┴──────────────────────────┘
/// ```
/// The final packet is zero padded, so `dst` always grows by a whole number
/// of packets.
pub fn wrap_frame(
    layout: PacketLayout,
    channel: u32,
    command: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let max = layout.max_payload_len();
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let c0 = layout.initial_capacity();
    let c1 = layout.continuation_capacity();
    dst.reserve(layout.packets_for(payload.len()) * layout.packet_size());

    let (head, mut rest) = payload.split_at(payload.len().min(c0));
    dst.put_u32(channel);
    dst.put_u8(command | TYPE_INIT);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(head);
    dst.put_bytes(0, c0 - head.len());

    let mut sequence = 0u8;
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(c1));
        dst.put_u32(channel);
        dst.put_u8(sequence);
        dst.put_slice(chunk);
        dst.put_bytes(0, c1 - chunk.len());
        sequence += 1;
        rest = tail;
    }

    trace!(
        command = command_name(command),
        len = payload.len(),
        packets = layout.packets_for(payload.len()),
        "wrapped frame for channel {channel:#010x}"
    );
    Ok(())
}

fn check_packet_len(layout: PacketLayout, packet: &[u8]) -> Result<()> {
    if packet.len() != layout.packet_size() {
        return Err(FrameError::InvalidBufferLength {
            len: packet.len(),
            packet_size: layout.packet_size(),
        });
    }
    Ok(())
}

/// Parse and validate the header of an initial packet.
///
/// Checks packet size, channel, the initial-packet bit and the declared
/// length. The command is returned but not checked.
pub fn read_initial_header(
    layout: PacketLayout,
    expected_channel: u32,
    packet: &[u8],
) -> Result<InitialHeader> {
    check_packet_len(layout, packet)?;

    let mut header = &packet[..INITIAL_HEADER_SIZE];
    let channel = header.get_u32();
    let command = header.get_u8();
    let total_len = header.get_u16() as usize;

    if channel != expected_channel {
        return Err(FrameError::ChannelMismatch {
            expected: expected_channel,
            actual: channel,
        });
    }
    if command & TYPE_INIT == 0 {
        return Err(FrameError::NotInitialPacket(command));
    }

    let max = layout.max_payload_len();
    if total_len > max {
        return Err(FrameError::DeclaredLengthTooLarge {
            declared: total_len,
            max,
        });
    }

    Ok(InitialHeader {
        channel,
        command,
        total_len,
    })
}

/// Validate an initial packet and return `(total_len, leading_payload)`.
///
/// `leading_payload` holds the first `min(total_len, initial_capacity)` bytes
/// of the frame. A `U2FHID_ERROR` packet where another command was expected
/// becomes [`FrameError::DeviceError`].
pub fn unwrap_initial_packet(
    layout: PacketLayout,
    expected_channel: u32,
    expected_command: u8,
    packet: &[u8],
) -> Result<(usize, &[u8])> {
    let header = read_initial_header(layout, expected_channel, packet)?;
    let expected_command = expected_command | TYPE_INIT;

    if header.command != expected_command {
        if header.command == U2FHID_ERROR {
            if header.total_len == 0 {
                return Err(FrameError::Malformed("ERROR frame without an error code"));
            }
            return Err(FrameError::DeviceError {
                code: packet[INITIAL_HEADER_SIZE],
            });
        }
        return Err(FrameError::CommandMismatch {
            expected: expected_command,
            actual: header.command,
        });
    }

    let lead = header.total_len.min(layout.initial_capacity());
    Ok((
        header.total_len,
        &packet[INITIAL_HEADER_SIZE..INITIAL_HEADER_SIZE + lead],
    ))
}

/// Validate a continuation packet and return its whole payload area.
///
/// The caller trims the final packet's padding.
pub fn unwrap_continuation_packet(
    layout: PacketLayout,
    expected_channel: u32,
    expected_sequence: u8,
    packet: &[u8],
) -> Result<&[u8]> {
    check_packet_len(layout, packet)?;

    let mut header = &packet[..CONTINUATION_HEADER_SIZE];
    let channel = header.get_u32();
    let sequence = header.get_u8();

    if channel != expected_channel {
        return Err(FrameError::ChannelMismatch {
            expected: expected_channel,
            actual: channel,
        });
    }
    if sequence & TYPE_INIT != 0 {
        return Err(FrameError::UnexpectedInitialPacket(sequence));
    }
    if sequence != expected_sequence {
        return Err(FrameError::SequenceMismatch {
            expected: expected_sequence,
            actual: sequence,
        });
    }

    Ok(&packet[CONTINUATION_HEADER_SIZE..])
}

/// Reassemble a buffer of concatenated packets into its payload.
///
/// `packets` must be a whole number of packets. Packets beyond the ones the
/// declared length needs are ignored.
pub fn unwrap_frame(
    layout: PacketLayout,
    expected_channel: u32,
    expected_command: u8,
    packets: &[u8],
) -> Result<Bytes> {
    if packets.is_empty() || packets.len() % layout.packet_size() != 0 {
        return Err(FrameError::InvalidBufferLength {
            len: packets.len(),
            packet_size: layout.packet_size(),
        });
    }

    let mut chunks = packets.chunks_exact(layout.packet_size());
    let first = chunks
        .next()
        .ok_or(FrameError::Malformed("no initial packet"))?;
    let mut assembler = FrameAssembler::start(layout, expected_channel, expected_command, first)?;

    for packet in chunks {
        if assembler.is_complete() {
            break;
        }
        assembler.push(packet)?;
    }

    Ok(assembler.finish()?.payload)
}
