//! Constants and tags shared by the host and sync protocols.
//!
//! Host protocol frame: `hex4(len) | payload`, status replies are the raw
//! 4-byte strings `OKAY` / `FAIL`.
//! Sync protocol frame: `tag:[u8; 4] | len:u32le | payload`, all integers
//! little-endian.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};

/// Largest payload a 4-hex-digit length header can describe.
pub const MAX_MESSAGE_LENGTH: usize = 0xFFFF;

/// Largest DATA payload allowed in one sync frame (64 KiB).
pub const SYNC_MAX_CHUNK_SIZE: usize = 64 * 1024;

pub const STATUS_OKAY: &[u8; 4] = b"OKAY";
pub const STATUS_FAIL: &[u8; 4] = b"FAIL";

// =============================================================================
// Status
// =============================================================================

/// Reply status to a host or sync request.
///
/// Only ever observed once per request. A `FAIL` reply never reaches callers
/// as a value: the codecs turn it into an error carrying the server text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Fail,
}

impl Status {
    pub fn from_bytes(raw: &[u8; 4]) -> Option<Self> {
        match raw {
            STATUS_OKAY => Some(Self::Okay),
            STATUS_FAIL => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Okay => STATUS_OKAY,
            Self::Fail => STATUS_FAIL,
        }
    }
}

// =============================================================================
// Sync command tags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
    Stat,
    List,
    Dent,
    Done,
    Send,
    Recv,
    Data,
    Okay,
    Fail,
}

impl SyncTag {
    pub fn from_bytes(raw: &[u8; 4]) -> Option<Self> {
        match raw {
            b"STAT" => Some(Self::Stat),
            b"LIST" => Some(Self::List),
            b"DENT" => Some(Self::Dent),
            b"DONE" => Some(Self::Done),
            b"SEND" => Some(Self::Send),
            b"RECV" => Some(Self::Recv),
            b"DATA" => Some(Self::Data),
            b"OKAY" => Some(Self::Okay),
            b"FAIL" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Stat => b"STAT",
            Self::List => b"LIST",
            Self::Dent => b"DENT",
            Self::Done => b"DONE",
            Self::Send => b"SEND",
            Self::Recv => b"RECV",
            Self::Data => b"DATA",
            Self::Okay => b"OKAY",
            Self::Fail => b"FAIL",
        }
    }

    pub fn as_str(self) -> &'static str {
        // Every tag is plain ASCII.
        std::str::from_utf8(self.as_bytes()).unwrap_or("????")
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Host framing
// =============================================================================

/// Frames `payload` with its 4-hex-digit length header.
pub fn encode_host_message(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(Error::assertion(format!(
            "message length {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_LENGTH
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_slice(format!("{:04x}", payload.len()).as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Parses a 4-character hex length header (either case).
pub fn decode_length_header(raw: &[u8; 4]) -> Result<usize> {
    let decoded = hex::decode(raw).map_err(|e| {
        Error::with_source(
            ErrorKind::ParseError,
            format!("invalid length header {:?}", String::from_utf8_lossy(raw)),
            e,
        )
    })?;
    Ok(u16::from_be_bytes([decoded[0], decoded[1]]) as usize)
}

// =============================================================================
// Tests
// =============================================================================
