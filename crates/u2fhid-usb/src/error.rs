use crate::traits::Direction;

/// Errors raised by the USB host stack.
#[derive(Debug, thiserror::Error)]
pub enum UsbError {
    /// A transfer request could not be bound to an endpoint.
    #[error("transfer request could not be opened on endpoint {endpoint:#04x}")]
    RequestInit { endpoint: u8 },

    /// A transfer could not be queued.
    #[error("failed to queue {direction} transfer")]
    Queue { direction: Direction },

    /// Waiting for a queued transfer failed at the stack level.
    #[error("waiting for transfer completion failed: {0}")]
    Wait(String),

    /// The transfer was cancelled before it completed.
    #[error("transfer cancelled")]
    Cancelled,

    /// The device does not expose an interrupt IN/OUT endpoint pair.
    #[error("no usable HID endpoints: {0}")]
    NoEndpoints(String),

    /// An OS-level I/O error.
    #[error("usb I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UsbError>;
