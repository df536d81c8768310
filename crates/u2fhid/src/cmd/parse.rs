use std::time::Duration;

use u2fhid_frame::{
    U2FHID_CANCEL, U2FHID_CBOR, U2FHID_INIT, U2FHID_LOCK, U2FHID_MSG, U2FHID_PING, U2FHID_WINK,
};

use crate::exit::{CliError, CliResult};

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::usage(format!("unsupported duration unit: {unit}"))),
    }
}

/// Parse a channel id given in decimal or `0x` hex.
pub fn parse_channel(input: &str) -> CliResult<u32> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| CliError::usage(format!("invalid channel id: {input}")))
}

/// Parse a command name or byte value. The init bit is added if missing.
pub fn parse_command(input: &str) -> CliResult<u8> {
    let input = input.trim();
    let command = match input.to_ascii_lowercase().as_str() {
        "ping" => U2FHID_PING,
        "msg" => U2FHID_MSG,
        "lock" => U2FHID_LOCK,
        "init" => U2FHID_INIT,
        "wink" => U2FHID_WINK,
        "cbor" => U2FHID_CBOR,
        "cancel" => U2FHID_CANCEL,
        other => {
            let parsed = match other.strip_prefix("0x") {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => other.parse(),
            };
            parsed.map_err(|_| CliError::usage(format!("invalid command: {input}")))?
        }
    };
    Ok(command | u2fhid_frame::TYPE_INIT)
}

/// Decode a hex string. Whitespace and `:` separators are ignored.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits).map_err(|err| CliError::usage(format!("invalid hex payload: {err}")))
}
