//! U2FHID/CTAPHID packet framing.
//!
//! A logical [`Frame`] (channel, command, payload) travels as one initial
//! packet followed by zero or more continuation packets, each exactly one HID
//! report long:
//! - initial: channel (4B BE), command with bit 7 set, length (2B BE), payload
//! - continuation: channel (4B BE), sequence 0..=0x7F, payload
//!
//! Everything here is pure and synchronous. I/O lives in `u2fhid-session`.
//!
//! # Frame size limit
//!
//! The length field is 16 bits, but a frame can only use 128 continuation
//! packets because the sequence number is 7 bits. The usable limit is
//! therefore `min(65535, (packet_size - 7) + 128 * (packet_size - 5))`,
//! which is 7609 bytes for the usual 64-byte reports. The 65535 bound only
//! applies from 514-byte reports upward.
//!
//! ```
//! use u2fhid_frame::PacketLayout;
//!
//! assert_eq!(PacketLayout::default().max_payload_len(), 7609);
//! assert_eq!(PacketLayout::new(1024).unwrap().max_payload_len(), 65535);
//! ```

pub mod assembler;
pub mod channel;
pub mod codec;
pub mod error;
pub mod init;

pub use assembler::FrameAssembler;
pub use channel::{
    command_name, error_name, is_assignable_channel, BROADCAST_CHANNEL, CAPABILITY_CBOR,
    CAPABILITY_LOCK, CAPABILITY_NMSG, CAPABILITY_WINK, ERR_CHANNEL_BUSY, ERR_INVALID_CHANNEL,
    ERR_INVALID_CMD, ERR_INVALID_LEN, ERR_INVALID_PAR, ERR_INVALID_SEQ, ERR_LOCK_REQUIRED,
    ERR_MSG_TIMEOUT, ERR_OTHER, RESERVED_CHANNEL, TYPE_INIT, U2FHID_CANCEL, U2FHID_CBOR,
    U2FHID_ERROR, U2FHID_INIT, U2FHID_KEEPALIVE, U2FHID_LOCK, U2FHID_MSG, U2FHID_PING,
    U2FHID_WINK,
};
pub use codec::{
    frames_expected, read_initial_header, unwrap_continuation_packet, unwrap_frame,
    unwrap_initial_packet, wrap_frame, Frame, InitialHeader, PacketLayout,
    CONTINUATION_HEADER_SIZE, DEFAULT_PACKET_SIZE, INITIAL_HEADER_SIZE, MAX_PACKET_SIZE,
    MAX_SEQUENCE, MIN_PACKET_SIZE,
};
pub use error::{FrameError, Result};
pub use init::{InitRequest, InitResponse, INIT_NONCE_LEN, INIT_RESPONSE_LEN};
