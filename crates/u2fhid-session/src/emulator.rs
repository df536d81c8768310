//! A software U2FHID authenticator for [`SimulatedDevice`].
//!
//! It answers INIT on the broadcast channel, echoes PING, acknowledges WINK
//! and passes MSG/CBOR payloads to a handler (echo by default). Malformed
//! input is answered with `U2FHID_ERROR` the way a real key would.

use bytes::{Buf, BytesMut};
use tracing::debug;
use u2fhid_frame::{
    unwrap_frame, wrap_frame, Frame, FrameAssembler, InitResponse, PacketLayout,
    BROADCAST_CHANNEL, CAPABILITY_CBOR, CAPABILITY_WINK, ERR_INVALID_CHANNEL, ERR_INVALID_CMD,
    ERR_INVALID_LEN, ERR_INVALID_SEQ, INIT_NONCE_LEN, TYPE_INIT, U2FHID_CBOR, U2FHID_ERROR,
    U2FHID_INIT, U2FHID_KEEPALIVE, U2FHID_MSG, U2FHID_PING, U2FHID_WINK,
};
use u2fhid_usb::SimulatedDevice;

/// KEEPALIVE status byte: the authenticator is still processing.
pub const STATUS_PROCESSING: u8 = 0x01;

type Handler = Box<dyn FnMut(u8, &[u8]) -> Vec<u8> + Send>;

/// Scripted authenticator serving one channel.
pub struct SoftAuthenticator {
    layout: PacketLayout,
    channel: u32,
    version: (u8, u8, u8),
    capabilities: u8,
    stray_init: bool,
    keepalives: usize,
    handler: Option<Handler>,
    pending: Option<FrameAssembler>,
}

impl SoftAuthenticator {
    /// An authenticator that assigns `channel` to every INIT request.
    pub fn new(channel: u32) -> Self {
        Self {
            layout: PacketLayout::default(),
            channel,
            version: (1, 0, 0),
            capabilities: CAPABILITY_WINK | CAPABILITY_CBOR,
            stray_init: false,
            keepalives: 0,
            handler: None,
            pending: None,
        }
    }

    pub fn with_layout(mut self, layout: PacketLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_version(mut self, major: u8, minor: u8, build: u8) -> Self {
        self.version = (major, minor, build);
        self
    }

    pub fn with_capabilities(mut self, capabilities: u8) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Precede every INIT response with one answering a different nonce.
    pub fn with_stray_init(mut self, stray: bool) -> Self {
        self.stray_init = stray;
        self
    }

    /// Send `count` KEEPALIVE frames before each MSG/CBOR response.
    pub fn with_keepalives(mut self, count: usize) -> Self {
        self.keepalives = count;
        self
    }

    /// Handle MSG and CBOR requests. The default handler echoes.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(u8, &[u8]) -> Vec<u8> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Make this authenticator answer every packet written to `device`.
    pub fn install(mut self, device: &SimulatedDevice) {
        device.set_responder(move |packet| self.on_packet(packet));
    }

    /// Process one OUT packet and return the IN packets it triggers.
    pub fn on_packet(&mut self, packet: &[u8]) -> Vec<Vec<u8>> {
        if packet.len() != self.layout.packet_size() {
            debug!(len = packet.len(), "dropping packet of unexpected size");
            return Vec::new();
        }

        let mut header = packet;
        let channel = header.get_u32();
        let kind = header.get_u8();

        if kind & TYPE_INIT == 0 {
            return self.on_continuation(channel, packet);
        }

        if channel == BROADCAST_CHANNEL {
            return self.on_broadcast(kind, packet);
        }
        if channel != self.channel {
            return self.error(channel, ERR_INVALID_CHANNEL);
        }

        self.pending = None;
        match FrameAssembler::start(self.layout, channel, kind, packet) {
            Ok(assembler) if assembler.is_complete() => self.finish(assembler),
            Ok(assembler) => {
                self.pending = Some(assembler);
                Vec::new()
            }
            Err(_) => self.error(channel, ERR_INVALID_LEN),
        }
    }

    fn on_continuation(&mut self, channel: u32, packet: &[u8]) -> Vec<Vec<u8>> {
        let Some(mut assembler) = self.pending.take() else {
            return self.error(channel, ERR_INVALID_SEQ);
        };
        match assembler.push(packet) {
            Ok(()) if assembler.is_complete() => self.finish(assembler),
            Ok(()) => {
                self.pending = Some(assembler);
                Vec::new()
            }
            Err(_) => self.error(channel, ERR_INVALID_SEQ),
        }
    }

    fn on_broadcast(&mut self, command: u8, packet: &[u8]) -> Vec<Vec<u8>> {
        if command != U2FHID_INIT {
            return self.error(BROADCAST_CHANNEL, ERR_INVALID_CMD);
        }
        let nonce: [u8; INIT_NONCE_LEN] = match unwrap_frame(
            self.layout,
            BROADCAST_CHANNEL,
            U2FHID_INIT,
            packet,
        )
        .ok()
        .and_then(|payload| payload.as_ref().try_into().ok())
        {
            Some(nonce) => nonce,
            None => return self.error(BROADCAST_CHANNEL, ERR_INVALID_LEN),
        };

        let (major, minor, build) = self.version;
        let response = InitResponse {
            nonce,
            channel: self.channel,
            protocol_version: 2,
            version_major: major,
            version_minor: minor,
            version_build: build,
            capabilities: self.capabilities,
        };

        let mut out = Vec::new();
        if self.stray_init {
            let stray = InitResponse {
                nonce: nonce.map(|b| !b),
                channel: self.channel.wrapping_add(1),
                ..response
            };
            out.extend(self.wrap(BROADCAST_CHANNEL, U2FHID_INIT, &stray.to_bytes()));
        }
        out.extend(self.wrap(BROADCAST_CHANNEL, U2FHID_INIT, &response.to_bytes()));
        debug!("assigned channel {:#010x}", self.channel);
        out
    }

    fn finish(&mut self, assembler: FrameAssembler) -> Vec<Vec<u8>> {
        let Frame {
            channel,
            command,
            payload,
        } = match assembler.finish() {
            Ok(frame) => frame,
            Err(_) => return self.error(self.channel, ERR_INVALID_LEN),
        };

        let mut out = Vec::new();
        let reply = match command {
            U2FHID_PING => payload.to_vec(),
            U2FHID_WINK => Vec::new(),
            U2FHID_MSG | U2FHID_CBOR => {
                for _ in 0..self.keepalives {
                    out.extend(self.wrap(channel, U2FHID_KEEPALIVE, &[STATUS_PROCESSING]));
                }
                match self.handler.as_mut() {
                    Some(handler) => handler(command, &payload),
                    None => payload.to_vec(),
                }
            }
            _ => return self.error(channel, ERR_INVALID_CMD),
        };

        let response = self.wrap(channel, command, &reply);
        if response.is_empty() {
            return self.error(channel, ERR_INVALID_LEN);
        }
        out.extend(response);
        out
    }

    fn error(&self, channel: u32, code: u8) -> Vec<Vec<u8>> {
        debug!(code, "answering with U2FHID_ERROR on channel {channel:#010x}");
        self.wrap(channel, U2FHID_ERROR, &[code])
    }

    fn wrap(&self, channel: u32, command: u8, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = BytesMut::new();
        if wrap_frame(self.layout, channel, command, payload, &mut buf).is_err() {
            return Vec::new();
        }
        buf.chunks(self.layout.packet_size())
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

impl std::fmt::Debug for SoftAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftAuthenticator")
            .field("channel", &self.channel)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("keepalives", &self.keepalives)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{packets, TEST_NONCE};

    #[test]
    fn answers_init_with_echoed_nonce() {
        let mut auth = SoftAuthenticator::new(0x1122_3344).with_version(5, 4, 3);
        let request = packets(BROADCAST_CHANNEL, U2FHID_INIT, &TEST_NONCE);

        let out = auth.on_packet(&request[0]);
        assert_eq!(out.len(), 1);
        let payload =
            unwrap_frame(PacketLayout::default(), BROADCAST_CHANNEL, U2FHID_INIT, &out[0]).unwrap();
        let response = InitResponse::try_from(payload.as_ref()).unwrap();
        assert_eq!(response.nonce, TEST_NONCE);
        assert_eq!(response.channel, 0x1122_3344);
        assert_eq!(
            (response.version_major, response.version_minor, response.version_build),
            (5, 4, 3)
        );
    }

    #[test]
    fn stray_init_comes_first() {
        let mut auth = SoftAuthenticator::new(9).with_stray_init(true);
        let request = packets(BROADCAST_CHANNEL, U2FHID_INIT, &TEST_NONCE);
        let out = auth.on_packet(&request[0]);
        assert_eq!(out.len(), 2);
        assert_ne!(&out[0][7..15], &TEST_NONCE);
        assert_eq!(&out[1][7..15], &TEST_NONCE);
    }

    #[test]
    fn echoes_multi_packet_message() {
        let mut auth = SoftAuthenticator::new(9);
        let request = packets(9, U2FHID_MSG, &[0x5a; 150]);

        assert!(auth.on_packet(&request[0]).is_empty());
        assert!(auth.on_packet(&request[1]).is_empty());
        let out = auth.on_packet(&request[2]);

        let payload = unwrap_frame(PacketLayout::default(), 9, U2FHID_MSG, &out.concat()).unwrap();
        assert_eq!(payload.as_ref(), &[0x5a; 150][..]);
    }

    #[test]
    fn custom_handler_and_keepalives() {
        let mut auth = SoftAuthenticator::new(9)
            .with_keepalives(2)
            .with_handler(|_, payload| payload.iter().rev().copied().collect());
        let out = auth.on_packet(&packets(9, U2FHID_CBOR, &[1, 2, 3])[0]);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0][4], U2FHID_KEEPALIVE);
        assert_eq!(out[1][4], U2FHID_KEEPALIVE);
        let payload = unwrap_frame(PacketLayout::default(), 9, U2FHID_CBOR, &out[2]).unwrap();
        assert_eq!(payload.as_ref(), &[3, 2, 1]);
    }

    #[test]
    fn unknown_channel_gets_invalid_channel_error() {
        let mut auth = SoftAuthenticator::new(9);
        let out = auth.on_packet(&packets(10, U2FHID_MSG, b"x")[0]);
        assert_eq!(out[0][4], U2FHID_ERROR);
        assert_eq!(out[0][7], ERR_INVALID_CHANNEL);
    }

    #[test]
    fn stray_continuation_gets_invalid_seq_error() {
        let mut auth = SoftAuthenticator::new(9);
        let request = packets(9, U2FHID_MSG, &[0; 100]);
        let out = auth.on_packet(&request[1]);
        assert_eq!(out[0][7], ERR_INVALID_SEQ);
    }
}
