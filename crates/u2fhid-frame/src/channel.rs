//! Channel ids, command bytes, capability flags and device error codes.
//!
//! Channel `0xFFFFFFFF` is the broadcast channel, used only to negotiate a
//! channel with `U2FHID_INIT`. Channel `0` is reserved and never assigned.

/// Broadcast channel, used for INIT before a channel is bound.
pub const BROADCAST_CHANNEL: u32 = 0xffff_ffff;

/// Reserved channel id, never assigned by a device.
pub const RESERVED_CHANNEL: u32 = 0;

/// Bit 7 of the command byte marks an initial packet.
pub const TYPE_INIT: u8 = 0x80;

/// Echo request.
pub const U2FHID_PING: u8 = TYPE_INIT | 0x01;
/// U2F/CTAP1 raw message.
pub const U2FHID_MSG: u8 = TYPE_INIT | 0x03;
/// Exclusive channel lock.
pub const U2FHID_LOCK: u8 = TYPE_INIT | 0x04;
/// Channel allocation.
pub const U2FHID_INIT: u8 = TYPE_INIT | 0x06;
/// Visual identification.
pub const U2FHID_WINK: u8 = TYPE_INIT | 0x08;
/// CTAP2 CBOR message.
pub const U2FHID_CBOR: u8 = TYPE_INIT | 0x10;
/// Abort the outstanding request on a channel.
pub const U2FHID_CANCEL: u8 = TYPE_INIT | 0x11;
/// Processing status, sent by the device while a request is pending.
pub const U2FHID_KEEPALIVE: u8 = TYPE_INIT | 0x3b;
/// Error response.
pub const U2FHID_ERROR: u8 = TYPE_INIT | 0x3f;

/// Device implements WINK.
pub const CAPABILITY_WINK: u8 = 0x01;
/// Device implements LOCK.
pub const CAPABILITY_LOCK: u8 = 0x02;
/// Device implements CBOR.
pub const CAPABILITY_CBOR: u8 = 0x04;
/// Device does NOT implement MSG.
pub const CAPABILITY_NMSG: u8 = 0x08;

/// The command byte is not supported.
pub const ERR_INVALID_CMD: u8 = 0x01;
/// A parameter in the request is invalid.
pub const ERR_INVALID_PAR: u8 = 0x02;
/// The declared length is invalid.
pub const ERR_INVALID_LEN: u8 = 0x03;
/// A continuation packet arrived out of order.
pub const ERR_INVALID_SEQ: u8 = 0x04;
/// The message timed out.
pub const ERR_MSG_TIMEOUT: u8 = 0x05;
/// Another channel is being served.
pub const ERR_CHANNEL_BUSY: u8 = 0x06;
/// The command requires a channel lock.
pub const ERR_LOCK_REQUIRED: u8 = 0x0a;
/// The channel id is not allocated.
pub const ERR_INVALID_CHANNEL: u8 = 0x0b;
/// Unspecified error.
pub const ERR_OTHER: u8 = 0x7f;

/// Returns a human-readable name for a command byte.
///
/// The high bit is ignored, so both `0x03` and `0x83` are `MSG`.
pub fn command_name(command: u8) -> &'static str {
    match command | TYPE_INIT {
        U2FHID_PING => "PING",
        U2FHID_MSG => "MSG",
        U2FHID_LOCK => "LOCK",
        U2FHID_INIT => "INIT",
        U2FHID_WINK => "WINK",
        U2FHID_CBOR => "CBOR",
        U2FHID_CANCEL => "CANCEL",
        U2FHID_KEEPALIVE => "KEEPALIVE",
        U2FHID_ERROR => "ERROR",
        0xc0..=0xff => "VENDOR",
        _ => "UNKNOWN",
    }
}

/// Returns a human-readable name for a `U2FHID_ERROR` code.
pub fn error_name(code: u8) -> &'static str {
    match code {
        ERR_INVALID_CMD => "INVALID_CMD",
        ERR_INVALID_PAR => "INVALID_PAR",
        ERR_INVALID_LEN => "INVALID_LEN",
        ERR_INVALID_SEQ => "INVALID_SEQ",
        ERR_MSG_TIMEOUT => "MSG_TIMEOUT",
        ERR_CHANNEL_BUSY => "CHANNEL_BUSY",
        ERR_LOCK_REQUIRED => "LOCK_REQUIRED",
        ERR_INVALID_CHANNEL => "INVALID_CHANNEL",
        ERR_OTHER => "OTHER",
        _ => "UNKNOWN",
    }
}

/// Returns true if a device may assign `channel` to a session.
pub fn is_assignable_channel(channel: u32) -> bool {
    channel != BROADCAST_CHANNEL && channel != RESERVED_CHANNEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_ignore_init_bit() {
        assert_eq!(command_name(U2FHID_MSG), "MSG");
        assert_eq!(command_name(0x03), "MSG");
        assert_eq!(command_name(U2FHID_INIT), "INIT");
        assert_eq!(command_name(0xbf), "ERROR");
        assert_eq!(command_name(0xc1), "VENDOR");
        assert_eq!(command_name(0x85), "UNKNOWN");
    }

    #[test]
    fn command_bytes_match_wire_values() {
        assert_eq!(U2FHID_PING, 0x81);
        assert_eq!(U2FHID_MSG, 0x83);
        assert_eq!(U2FHID_INIT, 0x86);
        assert_eq!(U2FHID_WINK, 0x88);
        assert_eq!(U2FHID_CBOR, 0x90);
        assert_eq!(U2FHID_KEEPALIVE, 0xbb);
        assert_eq!(U2FHID_ERROR, 0xbf);
    }

    #[test]
    fn assignable_channels() {
        assert!(is_assignable_channel(0x1122_3344));
        assert!(!is_assignable_channel(BROADCAST_CHANNEL));
        assert!(!is_assignable_channel(RESERVED_CHANNEL));
    }

    #[test]
    fn error_names() {
        assert_eq!(error_name(0x0b), "INVALID_CHANNEL");
        assert_eq!(error_name(0x42), "UNKNOWN");
    }
}
