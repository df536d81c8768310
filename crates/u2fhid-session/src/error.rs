use std::time::Duration;

use u2fhid_frame::FrameError;
use u2fhid_usb::UsbError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A USB transfer failed.
    #[error("usb error: {0}")]
    Io(#[from] UsbError),

    /// The device sent data that violates the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(FrameError),

    /// The outgoing payload cannot be framed.
    #[error("size error: {0}")]
    Size(FrameError),

    /// A bounded transfer exceeded its budget.
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    /// No channel is bound; call `connect` first.
    #[error("session is not connected")]
    NotConnected,

    /// The transfer worker could not run the task.
    #[error("transfer worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        if err.is_size_error() {
            SessionError::Size(err)
        } else {
            SessionError::Protocol(err)
        }
    }
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_route_by_family() {
        let size = SessionError::from(FrameError::PayloadTooLarge { size: 2, max: 1 });
        assert!(matches!(size, SessionError::Size(_)));

        let protocol = SessionError::from(FrameError::ChannelMismatch {
            expected: 1,
            actual: 2,
        });
        assert!(matches!(protocol, SessionError::Protocol(_)));
    }

    #[test]
    fn usb_errors_are_io() {
        let err: SessionError = UsbError::Cancelled.into();
        assert!(matches!(err, SessionError::Io(UsbError::Cancelled)));
        assert!(!err.is_timeout());
        assert!(SessionError::Timeout(Duration::from_millis(5)).is_timeout());
    }
}
