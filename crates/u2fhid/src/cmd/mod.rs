use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod parse;
pub mod plan;
pub mod simulate;
pub mod version;
pub mod wrap;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show how a payload is fragmented into HID packets.
    Plan(PlanArgs),
    /// Wrap a payload into U2FHID packets and print them.
    Wrap(WrapArgs),
    /// Connect and exchange a message with an in-memory authenticator.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Plan(args) => plan::run(args, format),
        Command::Wrap(args) => wrap::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Payload length in bytes.
    #[arg(long, short = 'l')]
    pub length: usize,
    /// HID report size in bytes.
    #[arg(long, env = "U2FHID_PACKET_SIZE", default_value_t = 64)]
    pub packet_size: usize,
}

#[derive(Args, Debug)]
pub struct WrapArgs {
    /// Channel id (decimal or 0x-prefixed hex).
    #[arg(long, short = 'c', default_value = "0xffffffff")]
    pub channel: String,
    /// Command name (msg, ping, wink, cbor, init, lock, cancel) or byte value.
    #[arg(long, default_value = "msg")]
    pub command: String,
    /// Payload as hex.
    #[arg(long, default_value = "")]
    pub hex: String,
    /// HID report size in bytes.
    #[arg(long, env = "U2FHID_PACKET_SIZE", default_value_t = 64)]
    pub packet_size: usize,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Size of the MSG payload sent to the authenticator.
    #[arg(long, default_value_t = 120)]
    pub payload_size: usize,
    /// Channel id the authenticator assigns (decimal or 0x-prefixed hex).
    #[arg(long, short = 'c', default_value = "0x11223344")]
    pub channel: String,
    /// HID report size in bytes.
    #[arg(long, env = "U2FHID_PACKET_SIZE", default_value_t = 64)]
    pub packet_size: usize,
    /// Budget for channel negotiation (e.g. 850ms, 1s).
    #[arg(long, env = "U2FHID_NEGOTIATION_TIMEOUT", default_value = "850ms")]
    pub negotiation_timeout: String,
    /// Budget for reading a response frame.
    #[arg(long, env = "U2FHID_READ_TIMEOUT", default_value = "2s")]
    pub read_timeout: String,
    /// Budget for writing a request frame.
    #[arg(long, env = "U2FHID_WRITE_TIMEOUT", default_value = "1s")]
    pub write_timeout: String,
    /// KEEPALIVE frames the authenticator sends before answering.
    #[arg(long, default_value_t = 0)]
    pub keepalives: usize,
    /// Make the authenticator answer a foreign INIT nonce first.
    #[arg(long)]
    pub stray_init: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
