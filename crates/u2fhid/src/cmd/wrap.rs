use serde::Serialize;
use u2fhid_frame::{command_name, Frame, PacketLayout};

use crate::cmd::parse::{parse_channel, parse_command, parse_hex};
use crate::cmd::WrapArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS};
use crate::output::{channel_hex, hex_string, print_json, print_raw, OutputFormat};

#[derive(Serialize, Debug)]
struct WrapOutput {
    schema_id: &'static str,
    channel: String,
    command: String,
    command_name: &'static str,
    payload_len: usize,
    packet_size: usize,
    packets: Vec<String>,
}

pub fn run(args: WrapArgs, format: OutputFormat) -> CliResult<i32> {
    let channel = parse_channel(&args.channel)?;
    let command = parse_command(&args.command)?;
    let payload = parse_hex(&args.hex)?;
    let layout = PacketLayout::new(args.packet_size)
        .map_err(|err| CliError::usage(format!("invalid packet size: {err}")))?;

    let frame = Frame::new(channel, command, payload);
    let wire = frame
        .to_packets(layout)
        .map_err(|err| frame_error("wrap failed", err))?;

    if let OutputFormat::Raw = format {
        print_raw(&wire);
        return Ok(SUCCESS);
    }

    let out = WrapOutput {
        schema_id: "https://schemas.3leaps.dev/u2fhid/cli/v1/wrapped-frame.schema.json",
        channel: channel_hex(frame.channel),
        command: format!("{:#04x}", frame.command),
        command_name: command_name(frame.command),
        payload_len: frame.payload.len(),
        packet_size: layout.packet_size(),
        packets: wire
            .chunks(layout.packet_size())
            .map(hex_string)
            .collect(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "{} {} on {}: {} bytes in {} packet(s)",
                out.command_name,
                out.command,
                out.channel,
                out.payload_len,
                out.packets.len()
            );
            for (index, packet) in out.packets.iter().enumerate() {
                println!("  [{index:>3}] {packet}");
            }
        }
        OutputFormat::Raw => {}
    }
    Ok(SUCCESS)
}
