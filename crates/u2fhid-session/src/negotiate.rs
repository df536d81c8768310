use bytes::BytesMut;
use rand::{CryptoRng, RngCore};
use tracing::debug;
use u2fhid_frame::{
    is_assignable_channel, unwrap_initial_packet, wrap_frame, FrameError, InitRequest,
    InitResponse, BROADCAST_CHANNEL, INITIAL_HEADER_SIZE, INIT_NONCE_LEN, INIT_RESPONSE_LEN,
    MAX_PACKET_SIZE, U2FHID_INIT,
};
use u2fhid_usb::UsbConnection;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::link::UsbLink;

/// Smallest packet that carries a whole INIT response.
pub const MIN_NEGOTIATION_PACKET_SIZE: usize = INITIAL_HEADER_SIZE + INIT_RESPONSE_LEN;

/// Allocate a channel with `U2FHID_INIT` on the broadcast channel.
///
/// A fresh nonce is drawn from `rng` and sent; then single packets are read
/// until one is an INIT response echoing that nonce. Unrelated packets,
/// responses to other nonces and responses assigning a reserved channel are
/// logged and skipped. Only `config.negotiation_timeout` bounds the loop.
pub fn negotiate_channel<C, R>(
    link: &UsbLink<C>,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<InitResponse>
where
    C: UsbConnection,
    R: RngCore + CryptoRng,
{
    let layout = link.layout();
    if layout.packet_size() < MIN_NEGOTIATION_PACKET_SIZE {
        return Err(SessionError::Size(FrameError::InvalidPacketSize {
            size: layout.packet_size(),
            min: MIN_NEGOTIATION_PACKET_SIZE,
            max: MAX_PACKET_SIZE,
        }));
    }

    let mut nonce = [0u8; INIT_NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let request = InitRequest::new(nonce);
    debug!(nonce = ?request.nonce, "negotiating channel");

    let mut packets = BytesMut::new();
    wrap_frame(
        layout,
        BROADCAST_CHANNEL,
        U2FHID_INIT,
        request.as_bytes(),
        &mut packets,
    )?;
    link.write_packets(packets.freeze(), config.write_timeout)?;

    let response = link.read_until(config.negotiation_timeout, move |packet| {
        let parsed = unwrap_initial_packet(layout, BROADCAST_CHANNEL, U2FHID_INIT, packet)
            .and_then(|(_, data)| InitResponse::parse_for(data, &request));
        match parsed {
            Ok(response) if is_assignable_channel(response.channel) => Some(response),
            Ok(response) => {
                debug!(
                    "ignoring INIT response assigning reserved channel {:#010x}",
                    response.channel
                );
                None
            }
            Err(err) => {
                debug!(error = %err, "ignoring unrelated INIT response");
                None
            }
        }
    })?;

    debug!(
        protocol = response.protocol_version,
        capabilities = response.capabilities,
        "device assigned channel {:#010x}",
        response.channel
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use u2fhid_frame::{PacketLayout, U2FHID_MSG};
    use u2fhid_usb::SimulatedDevice;

    use super::*;
    use crate::test_support::{init_response, packets, FixedRng, TEST_NONCE};

    fn link(device: &SimulatedDevice, packet_size: usize) -> UsbLink<SimulatedDevice> {
        let (endpoint_in, endpoint_out) = device.open_endpoints().unwrap();
        UsbLink::new(
            Arc::new(device.clone()),
            endpoint_in,
            endpoint_out,
            PacketLayout::new(packet_size).unwrap(),
        )
        .unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig::default().with_negotiation_timeout(Duration::from_millis(200))
    }

    #[test]
    fn sends_init_on_broadcast_and_accepts_matching_nonce() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 0x1122_3344));

        let response = negotiate_channel(&link(&device, 64), &config(), &mut FixedRng).unwrap();
        assert_eq!(response.channel, 0x1122_3344);

        let written = device.written_packets();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][..7], &[0xff, 0xff, 0xff, 0xff, 0x86, 0x00, 0x08]);
        assert_eq!(&written[0][7..15], &TEST_NONCE);
    }

    #[test]
    fn skips_mismatched_nonce_and_unrelated_traffic() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response([9; 8], 0x0bad_0bad));
        device.push_inbound(packets(0x5555_5555, U2FHID_MSG, b"other app").concat());
        device.push_inbound(init_response(TEST_NONCE, 0x1122_3344));

        let response = negotiate_channel(&link(&device, 64), &config(), &mut FixedRng).unwrap();
        assert_eq!(response.channel, 0x1122_3344);
        assert_eq!(device.inbound_len(), 0);
    }

    #[test]
    fn skips_response_assigning_broadcast_channel() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, BROADCAST_CHANNEL));
        device.push_inbound(init_response(TEST_NONCE, 7));

        let response = negotiate_channel(&link(&device, 64), &config(), &mut FixedRng).unwrap();
        assert_eq!(response.channel, 7);
    }

    #[test]
    fn endless_unrelated_traffic_times_out() {
        let device = SimulatedDevice::new();
        for _ in 0..32 {
            device.push_inbound(init_response([9; 8], 1));
        }

        let err = negotiate_channel(&link(&device, 64), &config(), &mut FixedRng).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn packet_too_small_for_init_response() {
        let device = SimulatedDevice::with_packet_size(16);
        let err = negotiate_channel(&link(&device, 16), &config(), &mut FixedRng).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Size(FrameError::InvalidPacketSize { size: 16, .. })
        ));
        assert!(device.written_packets().is_empty());
    }
}
