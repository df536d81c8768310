use std::time::Duration;

use serde::{Deserialize, Serialize};
use u2fhid_frame::{PacketLayout, DEFAULT_PACKET_SIZE};

/// Budget for the INIT read loop.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_millis(850);

/// Budget for reading one response frame.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);

/// Budget for writing one request frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Configuration for a [`TransportSession`](crate::TransportSession).
///
/// Serialized timeouts are whole milliseconds; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HID report size in bytes. Default: 64.
    pub packet_size: usize,
    /// Deadline for receiving a matching INIT response.
    #[serde(rename = "negotiation_timeout_ms", with = "millis")]
    pub negotiation_timeout: Duration,
    /// Deadline for reading a whole response frame.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Duration,
    /// Deadline for writing a whole request frame.
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Validate the packet size and derive the packet layout.
    pub fn layout(&self) -> u2fhid_frame::Result<PacketLayout> {
        PacketLayout::new(self.packet_size)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
