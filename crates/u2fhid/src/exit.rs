use std::fmt;
use std::io;

use u2fhid_frame::FrameError;
use u2fhid_session::SessionError;
use u2fhid_usb::UsbError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn usb_error(context: &str, err: UsbError) -> CliError {
    match err {
        UsbError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    if err.is_size_error() {
        CliError::new(DATA_INVALID, format!("{context}: {err}"))
    } else {
        CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Io(err) => usb_error(context, err),
        SessionError::Protocol(err) | SessionError::Size(err) => frame_error(context, err),
        SessionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        SessionError::WorkerUnavailable(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn session_errors_map_to_exit_codes() {
        let timeout = session_error("connect", SessionError::Timeout(Duration::from_millis(5)));
        assert_eq!(timeout.code, TIMEOUT);
        assert!(timeout.message.starts_with("connect: "));

        let size = session_error(
            "send",
            SessionError::Size(FrameError::PayloadTooLarge { size: 2, max: 1 }),
        );
        assert_eq!(size.code, DATA_INVALID);

        let protocol = session_error(
            "read",
            SessionError::Protocol(FrameError::SequenceMismatch {
                expected: 0,
                actual: 1,
            }),
        );
        assert_eq!(protocol.code, TRANSPORT_ERROR);

        let io = session_error("open", SessionError::Io(UsbError::Cancelled));
        assert_eq!(io.code, TRANSPORT_ERROR);
    }

    #[test]
    fn permission_denied_is_distinct() {
        let err = usb_error(
            "open",
            UsbError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }
}
