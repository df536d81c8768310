//! USB host-stack capability boundary for U2FHID.
//!
//! The protocol layers above never talk to a USB stack directly. They see a
//! [`UsbConnection`] that hands out [`TransferRequest`]s, plus two interrupt
//! [`Endpoint`]s and a shared [`TransferBuffer`]:
//! - queue a transfer on a request
//! - block until some queued transfer completes
//! - cancel and close the request
//!
//! Device discovery and permission handling happen before a connection is
//! handed to this crate. [`SimulatedDevice`] is a scripted in-memory
//! implementation used by tests and the CLI demo.

pub mod error;
pub mod sim;
pub mod traits;

pub use error::{Result, UsbError};
pub use sim::{SimRequest, SimulatedDevice};
pub use traits::{Direction, Endpoint, TransferBuffer, TransferRequest, UsbConnection};
