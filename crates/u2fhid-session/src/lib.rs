//! U2FHID client transport session.
//!
//! [`TransportSession`] binds a channel with `U2FHID_INIT`, then exchanges
//! request/response frames on it. Blocking USB transfers run on a per-session
//! worker thread ([`BoundedExecutor`]) so every transfer can be abandoned
//! after its budget:
//! - negotiation: 850 ms
//! - read: 2000 ms
//! - write: 1000 ms

pub mod config;
pub mod emulator;
pub mod error;
pub mod executor;
pub mod link;
pub mod negotiate;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::{
    SessionConfig, DEFAULT_NEGOTIATION_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use emulator::SoftAuthenticator;
pub use error::{Result, SessionError};
pub use executor::BoundedExecutor;
pub use link::UsbLink;
pub use negotiate::{negotiate_channel, MIN_NEGOTIATION_PACKET_SIZE};
pub use session::{DeviceInfo, SessionState, TransportSession};
