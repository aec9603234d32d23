//! Custom-command wire format.
//!
//! Every custom command travels as a fixed 24-byte header followed by
//! its payload. The header carries a network magic, a NUL-padded command
//! name, the payload length, and a BLAKE3 checksum prefix. Multi-byte
//! integers are big-endian byte arrays so the packed layout is the same
//! on every host.
//!
//! All types are #[repr(C, packed)] and use zerocopy derives for
//! allocation-free parsing. There is no unsafe code in this module.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Network magic at the start of every frame.
pub const MAGIC: u32 = 0xE9BE_B4D9;

/// Maximum command name length.
pub const COMMAND_LEN: usize = 12;

/// Largest payload accepted in one frame.
pub const MAX_PAYLOAD: usize = 1 << 20;

/// Command tag of proof-of-work requests and responses.
pub const POW_COMMAND: &str = "pow";

/// Command tag of plaintext error replies.
pub const ERROR_COMMAND: &str = "error";

// ── Header ────────────────────────────────────────────────────────────────────

/// Frame header. Wire size: 24 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CommandHeader {
    /// Always `MAGIC`, big-endian.
    pub magic: [u8; 4],
    /// ASCII command name, NUL-padded.
    pub command: [u8; COMMAND_LEN],
    /// Payload length in bytes, big-endian.
    pub length: [u8; 4],
    /// First four bytes of the BLAKE3 hash of the payload.
    pub checksum: [u8; 4],
}

assert_eq_size!(CommandHeader, [u8; 24]);

/// Header size on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<CommandHeader>();

impl CommandHeader {
    pub fn new(command: &str, payload: &[u8]) -> Result<Self, WireError> {
        let name = command.as_bytes();
        if name.is_empty() || name.len() > COMMAND_LEN || !command.is_ascii() {
            return Err(WireError::BadCommand(command.to_string()));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::TooLarge(payload.len()));
        }
        let mut padded = [0u8; COMMAND_LEN];
        padded[..name.len()].copy_from_slice(name);
        Ok(Self {
            magic: MAGIC.to_be_bytes(),
            command: padded,
            length: (payload.len() as u32).to_be_bytes(),
            checksum: checksum(payload),
        })
    }

    /// Parse and validate a header. The payload is checked separately
    /// with [`CommandHeader::verify`] once it has been read.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(bytes).ok_or(WireError::Truncated)?;
        if u32::from_be_bytes(header.magic) != MAGIC {
            return Err(WireError::BadMagic);
        }
        if header.payload_len() > MAX_PAYLOAD {
            return Err(WireError::TooLarge(header.payload_len()));
        }
        header.command_name()?;
        Ok(header)
    }

    pub fn payload_len(&self) -> usize {
        u32::from_be_bytes(self.length) as usize
    }

    /// Command name with the NUL padding stripped.
    pub fn command_name(&self) -> Result<&str, WireError> {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LEN);
        std::str::from_utf8(&self.command[..end])
            .ok()
            .filter(|s| !s.is_empty() && s.is_ascii())
            .ok_or_else(|| WireError::BadCommand(hex::encode(self.command)))
    }

    /// Check that `payload` matches the header's length and checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<(), WireError> {
        if payload.len() != self.payload_len() {
            return Err(WireError::Truncated);
        }
        if checksum(payload) != self.checksum {
            return Err(WireError::BadChecksum);
        }
        Ok(())
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = crate::crypto::hash(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

// ── Custom command ────────────────────────────────────────────────────────────

/// An application-defined message carried over the network's extension channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCommand {
    pub command: String,
    pub data: Bytes,
}

impl CustomCommand {
    pub fn new(command: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            data: data.into(),
        }
    }

    /// Plaintext error reply carrying a human-readable reason.
    pub fn error(reason: &str) -> Self {
        Self::new(ERROR_COMMAND, Bytes::copy_from_slice(reason.as_bytes()))
    }

    pub fn is_error(&self) -> bool {
        self.command == ERROR_COMMAND
    }

    /// Reason text of an error reply.
    pub fn error_reason(&self) -> Option<&str> {
        if self.is_error() {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// Header followed by payload.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let header = CommandHeader::new(&self.command, &self.data)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decode one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let header = CommandHeader::parse(frame)?;
        let payload = &frame[HEADER_LEN..];
        header.verify(payload)?;
        Ok(Self::from_parts(&header, Bytes::copy_from_slice(payload)))
    }

    /// Build from an already-verified header and payload.
    pub fn from_parts(header: &CommandHeader, payload: Bytes) -> Self {
        let command = header.command_name().unwrap_or_default().to_string();
        Self {
            command,
            data: payload,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame truncated")]
    Truncated,
    #[error("bad network magic")]
    BadMagic,
    #[error("invalid command name {0:?}")]
    BadCommand(String),
    #[error("payload of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("payload checksum mismatch")]
    BadChecksum,
}
