use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;
use u2fhid_session::{DeviceInfo, SessionConfig, SoftAuthenticator, TransportSession};
use u2fhid_usb::SimulatedDevice;

use crate::cmd::parse::{parse_channel, parse_duration};
use crate::cmd::SimulateArgs;
use crate::exit::{session_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{channel_hex, print_fields, print_json, print_pretty, OutputFormat};

#[derive(Serialize, Debug)]
struct DeviceOutput {
    #[serde(flatten)]
    info: DeviceInfo,
    device_version: String,
    wink: bool,
    lock: bool,
    cbor: bool,
    msg: bool,
}

#[derive(Serialize, Debug)]
struct SimulateOutput {
    schema_id: &'static str,
    channel: String,
    device: DeviceOutput,
    packet_size: usize,
    payload_len: usize,
    request_packets: usize,
    response_len: usize,
    round_trip_ms: f64,
    echo_ok: bool,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let channel = parse_channel(&args.channel)?;
    let config = SessionConfig::default()
        .with_packet_size(args.packet_size)
        .with_negotiation_timeout(parse_duration(&args.negotiation_timeout)?)
        .with_read_timeout(parse_duration(&args.read_timeout)?)
        .with_write_timeout(parse_duration(&args.write_timeout)?);
    let layout = config
        .layout()
        .map_err(|err| CliError::usage(format!("invalid packet size: {err}")))?;
    let endpoint_size = u16::try_from(layout.packet_size()).map_err(|_| {
        CliError::usage(format!(
            "packet size {} does not fit an endpoint",
            layout.packet_size()
        ))
    })?;

    let device = SimulatedDevice::with_packet_size(endpoint_size);
    SoftAuthenticator::new(channel)
        .with_layout(layout)
        .with_keepalives(args.keepalives)
        .with_stray_init(args.stray_init)
        .install(&device);

    let mut session = TransportSession::open(Arc::new(device.clone()), config)
        .map_err(|err| session_error("open failed", err))?;
    let info = session
        .connect()
        .map_err(|err| session_error("connect failed", err))?;
    let bound = session.channel_id().unwrap_or(channel);
    info!("bound to channel {bound:#010x}");

    let payload: Vec<u8> = (0..args.payload_size).map(|i| i as u8).collect();
    device.clear_written();

    let started = Instant::now();
    let response = session
        .transceive(&payload)
        .map_err(|err| session_error("transceive failed", err))?;
    let elapsed = started.elapsed();

    let out = SimulateOutput {
        schema_id: "https://schemas.3leaps.dev/u2fhid/cli/v1/simulate-result.schema.json",
        channel: channel_hex(bound),
        device: DeviceOutput {
            info,
            device_version: info.device_version(),
            wink: info.supports_wink(),
            lock: info.supports_lock(),
            cbor: info.supports_cbor(),
            msg: info.supports_msg(),
        },
        packet_size: layout.packet_size(),
        payload_len: payload.len(),
        request_packets: device.written_packets().len(),
        response_len: response.len(),
        round_trip_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        echo_ok: response == payload,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&rows(&out)),
        OutputFormat::Pretty => print_pretty(&rows(&out)),
        OutputFormat::Raw => println!("{}", out.channel),
    }

    if out.echo_ok {
        Ok(SUCCESS)
    } else {
        Err(CliError::new(
            FAILURE,
            "authenticator response differs from request",
        ))
    }
}

fn rows(out: &SimulateOutput) -> Vec<(&'static str, String)> {
    vec![
        ("channel", out.channel.clone()),
        ("protocol_version", out.device.info.protocol_version.to_string()),
        ("device_version", out.device.device_version.clone()),
        ("capabilities", format!("{:#04x}", out.device.info.capabilities)),
        ("packet_size", out.packet_size.to_string()),
        ("payload_len", out.payload_len.to_string()),
        ("request_packets", out.request_packets.to_string()),
        ("response_len", out.response_len.to_string()),
        ("round_trip_ms", format!("{:.2}", out.round_trip_ms)),
        ("echo_ok", out.echo_ok.to_string()),
    ]
}
