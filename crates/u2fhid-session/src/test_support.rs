use bytes::BytesMut;
use rand::{CryptoRng, RngCore};
use u2fhid_frame::{wrap_frame, InitResponse, PacketLayout, BROADCAST_CHANNEL, U2FHID_INIT};

/// Nonce produced by [`FixedRng`].
pub const TEST_NONCE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Deterministic RNG yielding the bytes 01..08 over and over.
pub struct FixedRng;

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes([1, 2, 3, 4])
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_le_bytes(TEST_NONCE)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for (byte, value) in dest.iter_mut().zip(TEST_NONCE.iter().cycle()) {
            *byte = *value;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixedRng {}

/// Wrap a frame into 64-byte packets.
pub fn packets(channel: u32, command: u8, payload: &[u8]) -> Vec<Vec<u8>> {
    let mut buf = BytesMut::new();
    wrap_frame(PacketLayout::default(), channel, command, payload, &mut buf).unwrap();
    buf.chunks(64).map(|chunk| chunk.to_vec()).collect()
}

/// A single-packet INIT response on the broadcast channel.
pub fn init_response(nonce: [u8; 8], channel: u32) -> Vec<u8> {
    let response = InitResponse {
        nonce,
        channel,
        protocol_version: 2,
        version_major: 1,
        version_minor: 2,
        version_build: 3,
        capabilities: 0x05,
    };
    packets(BROADCAST_CHANNEL, U2FHID_INIT, &response.to_bytes()).concat()
}
