use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{trace, warn};
use u2fhid_frame::{read_initial_header, FrameError, PacketLayout, U2FHID_KEEPALIVE};
use u2fhid_usb::{Direction, Endpoint, TransferBuffer, TransferRequest, UsbConnection, UsbError};

use crate::error::{Result, SessionError};
use crate::executor::BoundedExecutor;

/// Packet-level I/O over one USB connection.
///
/// Every public operation is a single bounded call on the executor: a whole
/// frame is written, or a whole frame is read, within one budget.
pub struct UsbLink<C: UsbConnection> {
    connection: Arc<C>,
    endpoint_in: Endpoint,
    endpoint_out: Endpoint,
    buffer: TransferBuffer,
    layout: PacketLayout,
    executor: BoundedExecutor,
}

impl<C: UsbConnection> UsbLink<C> {
    pub fn new(
        connection: Arc<C>,
        endpoint_in: Endpoint,
        endpoint_out: Endpoint,
        layout: PacketLayout,
    ) -> Result<Self> {
        if endpoint_in.direction != Direction::In || endpoint_out.direction != Direction::Out {
            return Err(UsbError::NoEndpoints(format!(
                "expected IN/OUT pair, got {:#04x} ({}) / {:#04x} ({})",
                endpoint_in.address,
                endpoint_in.direction,
                endpoint_out.address,
                endpoint_out.direction
            ))
            .into());
        }

        for endpoint in [endpoint_in, endpoint_out] {
            if usize::from(endpoint.max_packet_size) != layout.packet_size() {
                warn!(
                    max_packet_size = endpoint.max_packet_size,
                    packet_size = layout.packet_size(),
                    "endpoint {:#04x} packet size differs from configured packet size",
                    endpoint.address
                );
            }
        }

        Ok(Self {
            connection,
            endpoint_in,
            endpoint_out,
            buffer: TransferBuffer::new(layout.packet_size()),
            layout,
            executor: BoundedExecutor::new("u2fhid-io")?,
        })
    }

    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.endpoint_in, self.endpoint_out)
    }

    /// Write a buffer of whole packets to the OUT endpoint.
    pub fn write_packets(&self, packets: Bytes, timeout: Duration) -> Result<()> {
        let packet_size = self.layout.packet_size();
        if packets.is_empty() || packets.len() % packet_size != 0 {
            return Err(SessionError::Size(FrameError::InvalidBufferLength {
                len: packets.len(),
                packet_size,
            }));
        }

        let connection = Arc::clone(&self.connection);
        let buffer = self.buffer.clone();
        let endpoint = self.endpoint_out;

        self.executor
            .run(self.connection.allocate_request(), timeout, move |request| {
                if !request.initialize(&endpoint) {
                    return Err(UsbError::RequestInit {
                        endpoint: endpoint.address,
                    }
                    .into());
                }
                for packet in packets.chunks(packet_size) {
                    buffer.fill_from(packet);
                    if !request.queue(&buffer, packet_size) {
                        return Err(UsbError::Queue {
                            direction: Direction::Out,
                        }
                        .into());
                    }
                    connection.request_wait()?;
                    trace!(">>> {:02x?}", packet);
                }
                Ok(())
            })
    }

    /// Read one frame addressed to `channel` and return its packets.
    ///
    /// The initial packet's declared length decides how many continuation
    /// packets follow. KEEPALIVE frames on the channel are skipped. Command
    /// and sequence checks are left to the caller.
    pub fn read_packets(&self, channel: u32, timeout: Duration) -> Result<Vec<u8>> {
        let reader = self.packet_reader();
        let layout = self.layout;

        self.executor
            .run(self.connection.allocate_request(), timeout, move |request| {
                reader.open(request)?;
                loop {
                    let first = reader.next(request)?;
                    let header = read_initial_header(layout, channel, &first)?;
                    if header.command == U2FHID_KEEPALIVE {
                        trace!(status = first.get(7).copied(), "keepalive");
                        continue;
                    }

                    let count = layout.packets_for(header.total_len);
                    let mut packets = Vec::with_capacity(count * layout.packet_size());
                    packets.extend_from_slice(&first);
                    for _ in 1..count {
                        packets.extend_from_slice(&reader.next(request)?);
                    }
                    return Ok(packets);
                }
            })
    }

    /// Read single packets until `accept` yields a value.
    pub fn read_until<T, F>(&self, timeout: Duration, mut accept: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut(&[u8]) -> Option<T> + Send + 'static,
    {
        let reader = self.packet_reader();

        self.executor
            .run(self.connection.allocate_request(), timeout, move |request| {
                reader.open(request)?;
                loop {
                    let packet = reader.next(request)?;
                    if let Some(value) = accept(&packet) {
                        return Ok(value);
                    }
                }
            })
    }

    fn packet_reader(&self) -> PacketReader<C> {
        PacketReader {
            connection: Arc::clone(&self.connection),
            buffer: self.buffer.clone(),
            endpoint: self.endpoint_in,
            packet_size: self.layout.packet_size(),
        }
    }
}

impl<C: UsbConnection> std::fmt::Debug for UsbLink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbLink")
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .field("layout", &self.layout)
            .finish()
    }
}

struct PacketReader<C> {
    connection: Arc<C>,
    buffer: TransferBuffer,
    endpoint: Endpoint,
    packet_size: usize,
}

impl<C: UsbConnection> PacketReader<C> {
    fn open<Q: TransferRequest>(&self, request: &Q) -> Result<()> {
        if !request.initialize(&self.endpoint) {
            return Err(UsbError::RequestInit {
                endpoint: self.endpoint.address,
            }
            .into());
        }
        Ok(())
    }

    fn next<Q: TransferRequest>(&self, request: &Q) -> Result<Vec<u8>> {
        self.buffer.clear();
        if !request.queue(&self.buffer, self.packet_size) {
            return Err(UsbError::Queue {
                direction: Direction::In,
            }
            .into());
        }
        self.connection.request_wait()?;
        let packet = self.buffer.to_vec(self.packet_size);
        trace!("<<< {:02x?}", packet);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use u2fhid_frame::{wrap_frame, U2FHID_MSG};
    use u2fhid_usb::SimulatedDevice;

    use super::*;

    fn link(device: &SimulatedDevice) -> UsbLink<SimulatedDevice> {
        let (endpoint_in, endpoint_out) = device.open_endpoints().unwrap();
        UsbLink::new(
            Arc::new(device.clone()),
            endpoint_in,
            endpoint_out,
            PacketLayout::default(),
        )
        .unwrap()
    }

    fn frame(channel: u32, command: u8, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = BytesMut::new();
        wrap_frame(PacketLayout::default(), channel, command, payload, &mut buf).unwrap();
        buf.chunks(64).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn write_emits_every_packet() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        let packets: Vec<u8> = frame(5, U2FHID_MSG, &[0x11; 200]).concat();

        link.write_packets(Bytes::from(packets.clone()), Duration::from_secs(1))
            .unwrap();

        let written = device.written_packets();
        assert_eq!(written.len(), 4);
        assert_eq!(written.concat(), packets);
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn write_rejects_partial_packet() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        let err = link
            .write_packets(Bytes::from(vec![0u8; 65]), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Size(FrameError::InvalidBufferLength { len: 65, .. })
        ));
        assert_eq!(device.allocated_requests(), 0);
    }

    #[test]
    fn read_collects_declared_packet_count() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        for packet in frame(5, U2FHID_MSG, &[0x22; 200]) {
            device.push_inbound(packet);
        }
        device.push_inbound(vec![0xff; 64]);

        let packets = link.read_packets(5, Duration::from_secs(1)).unwrap();
        assert_eq!(packets.len(), 4 * 64);
        assert_eq!(device.inbound_len(), 1);
    }

    #[test]
    fn read_skips_keepalive() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        device.push_inbound(frame(5, U2FHID_KEEPALIVE, &[0x01]).concat());
        for packet in frame(5, U2FHID_MSG, b"done") {
            device.push_inbound(packet);
        }

        let packets = link.read_packets(5, Duration::from_secs(1)).unwrap();
        assert_eq!(packets.len(), 64);
        assert_eq!(packets[4], U2FHID_MSG);
    }

    #[test]
    fn read_rejects_foreign_channel() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        device.push_inbound(frame(6, U2FHID_MSG, b"not yours").concat());

        let err = link.read_packets(5, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(FrameError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn read_times_out_without_data() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        let err = link
            .read_packets(5, Duration::from_millis(50))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(device.cancel_count(), 1);
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn request_init_failure_is_io() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        device.set_fail_initialize(true);
        let err = link
            .write_packets(Bytes::from(vec![0u8; 64]), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Io(UsbError::RequestInit { endpoint: 0x01 })
        ));
    }

    #[test]
    fn queue_failure_is_io() {
        let device = SimulatedDevice::new();
        let link = link(&device);
        device.set_fail_queue(true);
        let err = link.read_packets(5, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Io(UsbError::Queue {
                direction: Direction::In
            })
        ));
    }

    #[test]
    fn mismatched_endpoints_are_rejected() {
        let device = SimulatedDevice::new();
        let (endpoint_in, endpoint_out) = device.open_endpoints().unwrap();
        let err = UsbLink::new(
            Arc::new(device),
            endpoint_out,
            endpoint_in,
            PacketLayout::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Io(UsbError::NoEndpoints(_))));
    }
}
