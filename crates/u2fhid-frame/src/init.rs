//! `U2FHID_INIT` request and response payloads.

use bytes::{Buf, BufMut};

use crate::channel::{CAPABILITY_CBOR, CAPABILITY_LOCK, CAPABILITY_NMSG, CAPABILITY_WINK};
use crate::error::{FrameError, Result};

/// Length of the INIT nonce.
pub const INIT_NONCE_LEN: usize = 8;

/// Minimum INIT response payload length.
pub const INIT_RESPONSE_LEN: usize = 17;

/// Payload of a `U2FHID_INIT` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRequest {
    pub nonce: [u8; INIT_NONCE_LEN],
}

impl InitRequest {
    pub fn new(nonce: [u8; INIT_NONCE_LEN]) -> Self {
        Self { nonce }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.nonce
    }
}

/// Payload of a `U2FHID_INIT` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResponse {
    /// Nonce echoed from the request.
    pub nonce: [u8; INIT_NONCE_LEN],
    /// Channel assigned to the caller.
    pub channel: u32,
    /// U2FHID protocol version (2).
    pub protocol_version: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    /// Capability flags (`CAPABILITY_*`).
    pub capabilities: u8,
}

impl InitResponse {
    /// Parse `data` and check that it answers `request`.
    pub fn parse_for(data: &[u8], request: &InitRequest) -> Result<Self> {
        let response = Self::try_from(data)?;
        if response.nonce != request.nonce {
            return Err(FrameError::NonceMismatch);
        }
        Ok(response)
    }

    /// Encode as the 17-byte response payload.
    pub fn to_bytes(&self) -> [u8; INIT_RESPONSE_LEN] {
        let mut out = [0u8; INIT_RESPONSE_LEN];
        let mut dst = &mut out[..];
        dst.put_slice(&self.nonce);
        dst.put_u32(self.channel);
        dst.put_u8(self.protocol_version);
        dst.put_u8(self.version_major);
        dst.put_u8(self.version_minor);
        dst.put_u8(self.version_build);
        dst.put_u8(self.capabilities);
        out
    }

    /// `true` if the device implements WINK.
    pub fn supports_wink(&self) -> bool {
        self.capabilities & CAPABILITY_WINK != 0
    }

    /// `true` if the device implements LOCK.
    pub fn supports_lock(&self) -> bool {
        self.capabilities & CAPABILITY_LOCK != 0
    }

    /// `true` if the device speaks CTAP2 CBOR.
    pub fn supports_cbor(&self) -> bool {
        self.capabilities & CAPABILITY_CBOR != 0
    }

    /// `true` if the device speaks U2F/CTAP1 MSG.
    pub fn supports_msg(&self) -> bool {
        self.capabilities & CAPABILITY_NMSG == 0
    }
}

impl TryFrom<&[u8]> for InitResponse {
    type Error = FrameError;

    /// Trailing bytes beyond the 17-byte response are ignored.
    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() < INIT_RESPONSE_LEN {
            return Err(FrameError::Malformed("INIT response shorter than 17 bytes"));
        }

        let mut src = data;
        let mut nonce = [0u8; INIT_NONCE_LEN];
        src.copy_to_slice(&mut nonce);

        Ok(Self {
            nonce,
            channel: src.get_u32(),
            protocol_version: src.get_u8(),
            version_major: src.get_u8(),
            version_minor: src.get_u8(),
            version_build: src.get_u8(),
            capabilities: src.get_u8(),
        })
    }
}
