//! U2FHID/CTAPHID client transport for USB security keys.
//!
//! u2fhid carries authenticator requests over a USB HID interface: channel
//! allocation, fragmentation into HID reports, reassembly, and timeout-bounded
//! transfers.
//!
//! # Crate Structure
//!
//! - [`usb`]: USB host-stack capability traits and a simulated device
//! - [`frame`]: packet framing, reassembly and INIT payloads
//! - [`session`]: channel negotiation and the transport session (behind `session` feature)

/// Re-export USB boundary types.
pub mod usb {
    pub use u2fhid_usb::*;
}

/// Re-export frame types.
pub mod frame {
    pub use u2fhid_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use u2fhid_session::*;
}
