use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// Transfer direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("IN"),
            Direction::Out => f.write_str("OUT"),
        }
    }
}

/// An interrupt endpoint of the HID interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint address, including the direction bit (0x80 for IN).
    pub address: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// `wMaxPacketSize` from the endpoint descriptor.
    pub max_packet_size: u16,
}

impl Endpoint {
    /// Describe an interrupt IN endpoint with the given endpoint number.
    pub fn interrupt_in(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: 0x80 | (number & 0x0f),
            direction: Direction::In,
            max_packet_size,
        }
    }

    /// Describe an interrupt OUT endpoint with the given endpoint number.
    pub fn interrupt_out(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: number & 0x0f,
            direction: Direction::Out,
            max_packet_size,
        }
    }
}

/// A reusable transfer buffer shared between a session and the USB stack.
///
/// Clones share the same storage. Queued IN transfers are filled on
/// completion; queued OUT transfers are read when they complete.
#[derive(Clone)]
pub struct TransferBuffer {
    inner: Arc<Mutex<Box<[u8]>>>,
}

impl TransferBuffer {
    /// Allocate a zeroed buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice())),
        }
    }

    /// Buffer capacity in bytes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True for a zero-sized buffer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive access to the buffer contents.
    ///
    /// A poisoned lock is recovered: the buffer holds plain bytes that every
    /// transfer overwrites before use.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy `data` into the front of the buffer and zero the remainder.
    pub fn fill_from(&self, data: &[u8]) {
        let mut buf = self.lock();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        buf[n..].fill(0);
    }

    /// Copy the first `len` bytes out of the buffer.
    pub fn to_vec(&self, len: usize) -> Vec<u8> {
        let buf = self.lock();
        buf[..len.min(buf.len())].to_vec()
    }

    /// Zero the whole buffer.
    pub fn clear(&self) {
        self.lock().fill(0);
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// An opened, permitted USB device connection.
///
/// Implementations are shared between the calling thread and a session's
/// transfer worker, so they must be `Send + Sync`.
pub trait UsbConnection: Send + Sync + 'static {
    /// The transfer request type handed out by this connection.
    type Request: TransferRequest + 'static;

    /// Return the `(in, out)` interrupt endpoints of the HID interface.
    fn open_endpoints(&self) -> Result<(Endpoint, Endpoint)>;

    /// Allocate a fresh, uninitialized transfer request.
    fn allocate_request(&self) -> Self::Request;

    /// Block until some queued transfer on this connection completes.
    fn request_wait(&self) -> Result<()>;
}

/// A single asynchronous transfer request.
///
/// `cancel` and `close` may be called from a different thread than the one
/// blocked in [`UsbConnection::request_wait`].
pub trait TransferRequest: Send + Sync {
    /// Bind the request to an endpoint. Returns `false` on failure.
    fn initialize(&self, endpoint: &Endpoint) -> bool;

    /// Queue a transfer of `length` bytes using `buffer`. Returns `false` if
    /// the stack refused the transfer.
    fn queue(&self, buffer: &TransferBuffer, length: usize) -> bool;

    /// Cancel any in-flight transfer on this request.
    fn cancel(&self);

    /// Release the request. Pending transfers are abandoned.
    fn close(&self);
}
