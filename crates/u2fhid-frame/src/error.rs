/// Errors that can occur during packet framing and reassembly.
///
/// Variants fall into two families. The size family ([`is_size_error`])
/// covers payloads or buffers that cannot be framed at all; everything else
/// is a protocol violation in received data.
///
/// [`is_size_error`]: FrameError::is_size_error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in one frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A packet buffer is not a whole number of packets.
    #[error("buffer length {len} is not a multiple of the {packet_size}-byte packet size")]
    InvalidBufferLength { len: usize, packet_size: usize },

    /// The packet size cannot carry the U2FHID headers.
    #[error("invalid packet size {size} (expected {min}..={max})")]
    InvalidPacketSize { size: usize, min: usize, max: usize },

    /// A packet arrived on a foreign channel.
    #[error("channel mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChannelMismatch { expected: u32, actual: u32 },

    /// The initial packet carries a different command.
    #[error("command mismatch (expected {expected:#04x}, got {actual:#04x})")]
    CommandMismatch { expected: u8, actual: u8 },

    /// A continuation packet is out of order.
    #[error("sequence mismatch (expected {expected}, got {actual})")]
    SequenceMismatch { expected: u8, actual: u8 },

    /// A continuation packet was found where an initial packet was expected.
    #[error("expected an initial packet, got continuation sequence {0}")]
    NotInitialPacket(u8),

    /// An initial packet was found in the middle of a frame.
    #[error("unexpected initial packet (command {0:#04x}) while reassembling")]
    UnexpectedInitialPacket(u8),

    /// The declared total length cannot be carried by this packet layout.
    #[error("declared length {declared} exceeds maximum {max}")]
    DeclaredLengthTooLarge { declared: usize, max: usize },

    /// The device answered with a U2FHID_ERROR frame.
    #[error("device reported error {code:#04x} ({})", crate::channel::error_name(*.code))]
    DeviceError { code: u8 },

    /// An INIT response echoed a different nonce.
    #[error("INIT response nonce does not match request")]
    NonceMismatch,

    /// Structurally invalid data.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

impl FrameError {
    /// True for errors caused by data that cannot be framed.
    pub fn is_size_error(&self) -> bool {
        matches!(
            self,
            FrameError::PayloadTooLarge { .. }
                | FrameError::InvalidBufferLength { .. }
                | FrameError::InvalidPacketSize { .. }
        )
    }

    /// True for errors caused by unexpected data from the device.
    pub fn is_protocol_error(&self) -> bool {
        !self.is_size_error()
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
