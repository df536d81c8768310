use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use u2fhid_frame::{
    command_name, unwrap_frame, wrap_frame, FrameError, InitResponse, PacketLayout,
    CAPABILITY_CBOR, CAPABILITY_LOCK, CAPABILITY_NMSG, CAPABILITY_WINK, U2FHID_MSG, U2FHID_PING,
    U2FHID_WINK,
};
use u2fhid_usb::{Endpoint, UsbConnection};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::link::UsbLink;
use crate::negotiate::negotiate_channel;

/// What the device reported about itself during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub protocol_version: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    pub capabilities: u8,
}

impl DeviceInfo {
    pub fn supports_wink(&self) -> bool {
        self.capabilities & CAPABILITY_WINK != 0
    }

    pub fn supports_lock(&self) -> bool {
        self.capabilities & CAPABILITY_LOCK != 0
    }

    pub fn supports_cbor(&self) -> bool {
        self.capabilities & CAPABILITY_CBOR != 0
    }

    pub fn supports_msg(&self) -> bool {
        self.capabilities & CAPABILITY_NMSG == 0
    }

    /// `major.minor.build`
    pub fn device_version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_build
        )
    }
}

impl From<&InitResponse> for DeviceInfo {
    fn from(response: &InitResponse) -> Self {
        Self {
            protocol_version: response.protocol_version,
            version_major: response.version_major,
            version_minor: response.version_minor,
            version_build: response.version_build,
            capabilities: response.capabilities,
        }
    }
}

/// Channel binding of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound { channel: u32, device: DeviceInfo },
}

/// A U2FHID client session over one USB HID interface.
///
/// Call [`connect`](Self::connect) to allocate a channel, then exchange
/// frames with [`transceive`](Self::transceive). Every USB transfer is
/// bounded by the budgets in [`SessionConfig`]. Dropping the session joins
/// its transfer worker.
pub struct TransportSession<C: UsbConnection, R = OsRng> {
    link: UsbLink<C>,
    config: SessionConfig,
    rng: R,
    state: SessionState,
}

impl<C: UsbConnection> TransportSession<C, OsRng> {
    /// Create an unbound session on the given endpoints.
    pub fn new(
        connection: Arc<C>,
        endpoint_in: Endpoint,
        endpoint_out: Endpoint,
        config: SessionConfig,
    ) -> Result<Self> {
        let layout = config.layout()?;
        let link = UsbLink::new(connection, endpoint_in, endpoint_out, layout)?;
        Ok(Self {
            link,
            config,
            rng: OsRng,
            state: SessionState::Unbound,
        })
    }

    /// Create an unbound session on the connection's HID endpoints.
    pub fn open(connection: Arc<C>, config: SessionConfig) -> Result<Self> {
        let (endpoint_in, endpoint_out) = connection.open_endpoints()?;
        Self::new(connection, endpoint_in, endpoint_out, config)
    }
}

impl<C: UsbConnection, R: RngCore + CryptoRng> TransportSession<C, R> {
    /// Replace the nonce source.
    pub fn with_rng<R2: RngCore + CryptoRng>(self, rng: R2) -> TransportSession<C, R2> {
        TransportSession {
            link: self.link,
            config: self.config,
            rng,
            state: self.state,
        }
    }

    /// Negotiate a channel and bind it to this session.
    ///
    /// Any previous binding is dropped first, so a failed attempt leaves the
    /// session unbound.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        debug!("initializing U2FHID transport");
        self.state = SessionState::Unbound;

        let response = negotiate_channel(&self.link, &self.config, &mut self.rng)?;
        let device = DeviceInfo::from(&response);
        self.state = SessionState::Bound {
            channel: response.channel,
            device,
        };
        Ok(device)
    }

    /// Send a `U2FHID_MSG` request and return the response payload.
    pub fn transceive(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.transceive_command(U2FHID_MSG, payload)
            .map(|response| response.to_vec())
    }

    /// Send `command` with `payload` and return the response payload.
    ///
    /// The response must arrive on the bound channel with the same command.
    pub fn transceive_command(&mut self, command: u8, payload: &[u8]) -> Result<Bytes> {
        let channel = self.channel_id().ok_or(SessionError::NotConnected)?;
        let layout = self.link.layout();

        let mut packets = BytesMut::new();
        wrap_frame(layout, channel, command, payload, &mut packets)?;
        debug!(
            command = command_name(command),
            len = payload.len(),
            packets = packets.len() / layout.packet_size(),
            "sending request"
        );
        self.link
            .write_packets(packets.freeze(), self.config.write_timeout)?;

        let response = self.link.read_packets(channel, self.config.read_timeout)?;
        let payload = unwrap_frame(layout, channel, command, &response)?;
        debug!(
            command = command_name(command),
            len = payload.len(),
            "received response"
        );
        Ok(payload)
    }

    /// Send a PING and check that the device echoes it.
    pub fn ping(&mut self, payload: &[u8]) -> Result<Bytes> {
        let echo = self.transceive_command(U2FHID_PING, payload)?;
        if echo.as_ref() != payload {
            return Err(SessionError::Protocol(FrameError::Malformed(
                "PING echo differs from request",
            )));
        }
        Ok(echo)
    }

    /// Ask the device to identify itself visually.
    pub fn wink(&mut self) -> Result<()> {
        self.transceive_command(U2FHID_WINK, &[])?;
        Ok(())
    }

    /// Bound channel, if connected.
    pub fn channel_id(&self) -> Option<u32> {
        match self.state {
            SessionState::Bound { channel, .. } => Some(channel),
            SessionState::Unbound => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, SessionState::Bound { .. })
    }

    /// Device details from the last successful negotiation.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        match self.state {
            SessionState::Bound { device, .. } => Some(device),
            SessionState::Unbound => None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn layout(&self) -> PacketLayout {
        self.link.layout()
    }
}

impl<C: UsbConnection, R> std::fmt::Debug for TransportSession<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("link", &self.link)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use u2fhid_frame::{ERR_CHANNEL_BUSY, U2FHID_CBOR, U2FHID_ERROR};
    use u2fhid_usb::{SimulatedDevice, UsbError};

    use super::*;
    use crate::emulator::SoftAuthenticator;
    use crate::test_support::{init_response, packets, FixedRng, TEST_NONCE};

    fn fast_config() -> SessionConfig {
        SessionConfig::default()
            .with_negotiation_timeout(Duration::from_millis(200))
            .with_read_timeout(Duration::from_millis(200))
            .with_write_timeout(Duration::from_millis(200))
    }

    fn session(
        device: &SimulatedDevice,
        config: SessionConfig,
    ) -> TransportSession<SimulatedDevice, FixedRng> {
        TransportSession::open(Arc::new(device.clone()), config)
            .unwrap()
            .with_rng(FixedRng)
    }

    fn connected(device: &SimulatedDevice) -> TransportSession<SimulatedDevice, FixedRng> {
        let mut session = session(device, fast_config());
        session.connect().unwrap();
        device.clear_written();
        session
    }

    #[test]
    fn end_to_end_msg_exchange() {
        let device = SimulatedDevice::new();
        SoftAuthenticator::new(0x1122_3344).install(&device);

        let mut session = session(&device, SessionConfig::default());
        assert!(!session.is_bound());

        let info = session.connect().unwrap();
        assert_eq!(session.channel_id(), Some(0x1122_3344));
        assert_eq!(info.protocol_version, 2);
        assert!(info.supports_msg());
        assert_eq!(&device.written_packets()[0][7..15], &TEST_NONCE);

        device.clear_written();
        let response = session.transceive(&[0xaa; 120]).unwrap();
        assert_eq!(response, vec![0xaa; 120]);

        let written = device.written_packets();
        assert_eq!(written.len(), 3);
        assert_eq!(&written[0][..7], &[0x11, 0x22, 0x33, 0x44, 0x83, 0x00, 120]);
        assert_eq!(&written[1][..5], &[0x11, 0x22, 0x33, 0x44, 0x00]);
        assert_eq!(&written[2][..5], &[0x11, 0x22, 0x33, 0x44, 0x01]);
    }

    #[test]
    fn transceive_requires_connect() {
        let device = SimulatedDevice::new();
        let mut session = session(&device, fast_config());
        assert!(matches!(
            session.transceive(b"hello"),
            Err(SessionError::NotConnected)
        ));
        assert!(device.written_packets().is_empty());
    }

    #[test]
    fn connect_skips_stray_init_response() {
        let device = SimulatedDevice::new();
        SoftAuthenticator::new(0x0102_0304)
            .with_stray_init(true)
            .install(&device);

        let mut session = session(&device, fast_config());
        session.connect().unwrap();
        assert_eq!(session.channel_id(), Some(0x0102_0304));
    }

    #[test]
    fn failed_connect_leaves_session_unbound() {
        let device = SimulatedDevice::new();
        SoftAuthenticator::new(5).install(&device);
        let mut session = session(&device, fast_config());
        session.connect().unwrap();

        device.set_stall_in(true);
        let err = session.connect().unwrap_err();
        assert!(err.is_timeout());
        assert!(!session.is_bound());
        assert_eq!(session.device_info(), None);
    }

    #[test]
    fn negotiation_timeout_is_bounded() {
        let device = SimulatedDevice::new();
        let config = fast_config().with_negotiation_timeout(Duration::from_millis(100));
        let mut session = session(&device, config);

        let started = Instant::now();
        let err = session.connect().unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SessionError::Timeout(t) if t == Duration::from_millis(100)));
        assert!(elapsed < Duration::from_millis(100) + Duration::from_millis(500));
        // one write and one read request, each closed once; only the read is cancelled
        assert_eq!(device.cancel_count(), 1);
        assert_eq!(device.close_count(), 2);
    }

    #[test]
    fn foreign_channel_response_is_protocol_error() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        device.push_inbound(packets(8, U2FHID_MSG, b"not ours").concat());
        let err = session.transceive(b"hi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(FrameError::ChannelMismatch {
                expected: 7,
                actual: 8
            })
        ));
    }

    #[test]
    fn out_of_order_continuation_is_protocol_error() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        let mut reply = packets(7, U2FHID_MSG, &[0; 200]);
        reply.swap(1, 2);
        for packet in reply {
            device.push_inbound(packet);
        }

        let err = session.transceive(b"hi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(FrameError::SequenceMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn wrong_response_command_is_protocol_error() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        device.push_inbound(packets(7, U2FHID_CBOR, b"cbor").concat());
        let err = session.transceive(b"hi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(FrameError::CommandMismatch { .. })
        ));
    }

    #[test]
    fn device_error_frame_is_reported() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        device.push_inbound(packets(7, U2FHID_ERROR, &[ERR_CHANNEL_BUSY]).concat());
        let err = session.transceive(b"hi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(FrameError::DeviceError { code: 0x06 })
        ));
    }

    #[test]
    fn oversized_payload_is_size_error() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        let err = session.transceive(&vec![0u8; 7610]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Size(FrameError::PayloadTooLarge { .. })
        ));
        assert!(device.written_packets().is_empty());
    }

    #[test]
    fn stalled_write_times_out() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        device.set_stall_out(true);
        let err = session.transceive(b"hi").unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn stack_failures_surface_as_io() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        let mut session = connected(&device);

        device.set_fail_queue(true);
        assert!(matches!(
            session.transceive(b"hi"),
            Err(SessionError::Io(UsbError::Queue { .. }))
        ));
        device.set_fail_queue(false);

        device.set_fail_wait(true);
        assert!(matches!(
            session.transceive(b"hi"),
            Err(SessionError::Io(UsbError::Wait(_)))
        ));
    }

    #[test]
    fn ping_wink_and_cbor() {
        let device = SimulatedDevice::new();
        SoftAuthenticator::new(0x0a0b_0c0d)
            .with_keepalives(1)
            .with_handler(|command, _| vec![command])
            .install(&device);

        let mut session = session(&device, fast_config());
        let info = session.connect().unwrap();
        assert!(info.supports_wink());
        assert!(info.supports_cbor());

        assert_eq!(session.ping(b"are you there").unwrap().as_ref(), b"are you there");
        session.wink().unwrap();
        let reply = session.transceive_command(U2FHID_CBOR, &[0x04]).unwrap();
        assert_eq!(reply.as_ref(), &[U2FHID_CBOR]);
    }

    #[test]
    fn reconnect_rebinds_channel() {
        let device = SimulatedDevice::new();
        device.push_inbound(init_response(TEST_NONCE, 7));
        device.push_inbound(init_response(TEST_NONCE, 9));
        let mut session = session(&device, fast_config());

        session.connect().unwrap();
        assert_eq!(session.channel_id(), Some(7));
        session.connect().unwrap();
        assert_eq!(session.channel_id(), Some(9));
    }

    #[test]
    fn invalid_packet_size_is_rejected() {
        let device = SimulatedDevice::new();
        let err = TransportSession::open(
            Arc::new(device),
            SessionConfig::default().with_packet_size(2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Size(FrameError::InvalidPacketSize { .. })
        ));
    }
}
