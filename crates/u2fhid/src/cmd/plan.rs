use serde::Serialize;
use u2fhid_frame::{PacketLayout, CONTINUATION_HEADER_SIZE, INITIAL_HEADER_SIZE};

use crate::cmd::PlanArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, OutputFormat};

#[derive(Serialize, Debug, PartialEq, Eq)]
struct PlanOutput {
    schema_id: &'static str,
    payload_len: usize,
    packet_size: usize,
    initial_capacity: usize,
    continuation_capacity: usize,
    max_payload_len: usize,
    packets: usize,
    wire_bytes: usize,
    padding_bytes: usize,
}

pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    let out = plan(args.length, args.packet_size)?;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&rows(&out)),
        OutputFormat::Pretty => print_pretty(&rows(&out)),
        OutputFormat::Raw => println!("{}", out.packets),
    }
    Ok(SUCCESS)
}

fn plan(length: usize, packet_size: usize) -> CliResult<PlanOutput> {
    let layout = PacketLayout::new(packet_size)
        .map_err(|err| CliError::usage(format!("invalid packet size: {err}")))?;

    let max = layout.max_payload_len();
    if length > max {
        return Err(CliError::new(
            DATA_INVALID,
            format!("payload of {length} bytes exceeds the {max} byte frame limit"),
        ));
    }

    let packets = layout.packets_for(length);
    let wire_bytes = packets * layout.packet_size();
    let headers = INITIAL_HEADER_SIZE + (packets - 1) * CONTINUATION_HEADER_SIZE;

    Ok(PlanOutput {
        schema_id: "https://schemas.3leaps.dev/u2fhid/cli/v1/fragment-plan.schema.json",
        payload_len: length,
        packet_size: layout.packet_size(),
        initial_capacity: layout.initial_capacity(),
        continuation_capacity: layout.continuation_capacity(),
        max_payload_len: max,
        packets,
        wire_bytes,
        padding_bytes: wire_bytes - headers - length,
    })
}

fn rows(out: &PlanOutput) -> Vec<(&'static str, String)> {
    vec![
        ("payload_len", out.payload_len.to_string()),
        ("packet_size", out.packet_size.to_string()),
        ("initial_capacity", out.initial_capacity.to_string()),
        ("continuation_capacity", out.continuation_capacity.to_string()),
        ("max_payload_len", out.max_payload_len.to_string()),
        ("packets", out.packets.to_string()),
        ("wire_bytes", out.wire_bytes.to_string()),
        ("padding_bytes", out.padding_bytes.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;

    #[test]
    fn plan_for_default_layout() {
        let out = plan(120, 64).unwrap();
        assert_eq!(out.initial_capacity, 57);
        assert_eq!(out.continuation_capacity, 59);
        assert_eq!(out.packets, 3);
        assert_eq!(out.wire_bytes, 192);
        // 7 + 5 + 5 header bytes, 120 payload bytes
        assert_eq!(out.padding_bytes, 192 - 17 - 120);
        assert_eq!(out.max_payload_len, 7609);
    }

    #[test]
    fn empty_payload_still_takes_one_packet() {
        let out = plan(0, 64).unwrap();
        assert_eq!(out.packets, 1);
        assert_eq!(out.padding_bytes, 57);
    }

    #[test]
    fn payload_limit_boundary() {
        assert_eq!(plan(7609, 64).unwrap().packets, 129);
        assert_eq!(plan(7610, 64).unwrap_err().code, DATA_INVALID);
    }

    #[test]
    fn invalid_packet_size_is_usage_error() {
        assert_eq!(plan(10, 4).unwrap_err().code, USAGE);
    }
}
