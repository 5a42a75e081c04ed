//! Sync-protocol codec.
//!
//! Binary and little-endian throughout. Lengths are u32le rather than the
//! hex headers of the host protocol. Modification times travel as u32 Unix
//! seconds.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::wire::conn::unexpected_status;
use crate::wire::filemode::FileMode;
use crate::wire::protocol::{Status, SyncTag, SYNC_MAX_CHUNK_SIZE};

/// A connection that has been switched into sync mode.
#[derive(Debug)]
pub struct SyncConn {
    transport: Transport,
}

impl SyncConn {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Sends a raw 4-byte id such as `STAT`.
    pub async fn send_octet_string(&mut self, s: &str) -> Result<()> {
        if s.len() != 4 {
            return Err(Error::assertion(format!(
                "octet string must be exactly 4 bytes: {s:?}"
            )));
        }
        self.transport.write_all(s.as_bytes(), "octet string").await
    }

    pub async fn send_tag(&mut self, tag: SyncTag) -> Result<()> {
        self.transport.write_all(tag.as_bytes(), "sync id").await
    }

    pub async fn send_i32(&mut self, value: i32) -> Result<()> {
        self.transport.write_all(&value.to_le_bytes(), "int32").await
    }

    /// Sends the raw mode word, type bits included.
    pub async fn send_file_mode(&mut self, mode: FileMode) -> Result<()> {
        let raw = mode.to_adb().to_le_bytes();
        self.transport.write_all(&raw, "file mode").await
    }

    /// Sends `time` as u32 seconds since the epoch.
    pub async fn send_time(&mut self, time: DateTime<Utc>) -> Result<()> {
        let secs = u32::try_from(time.timestamp()).map_err(|_| {
            Error::assertion(format!("time {time} does not fit in 32-bit epoch seconds"))
        })?;
        self.transport.write_all(&secs.to_le_bytes(), "time").await
    }

    /// Sends a u32le length followed by the raw string bytes.
    pub async fn send_string(&mut self, s: &str) -> Result<()> {
        let len = u32::try_from(s.len())
            .map_err(|_| Error::assertion(format!("string length {} overflows u32", s.len())))?;
        let mut buf = BytesMut::with_capacity(4 + s.len());
        buf.put_u32_le(len);
        buf.put_slice(s.as_bytes());
        self.transport.write_all(&buf, "string").await
    }

    /// Sends one length-prefixed blob of at most [`SYNC_MAX_CHUNK_SIZE`] bytes.
    ///
    /// Oversized blobs are rejected before anything is written.
    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > SYNC_MAX_CHUNK_SIZE {
            return Err(Error::assertion(format!(
                "data must be <= {} in length, got {}",
                SYNC_MAX_CHUNK_SIZE,
                data.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(4 + data.len());
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(data);
        self.transport.write_all(&buf, "bytes").await
    }

    /// `tag` followed by the length-prefixed `path`: the opening of every request.
    pub async fn send_request(&mut self, tag: SyncTag, path: &str) -> Result<()> {
        self.send_tag(tag).await?;
        self.send_string(path).await
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub async fn read_octet_string(&mut self) -> Result<[u8; 4]> {
        let mut raw = [0u8; 4];
        self.transport.read_full(&mut raw, "octet string").await?;
        Ok(raw)
    }

    /// Reads an id and rejects anything outside the known set.
    pub async fn read_tag(&mut self) -> Result<SyncTag> {
        let raw = self.read_octet_string().await?;
        SyncTag::from_bytes(&raw).ok_or_else(|| {
            Error::new(
                ErrorKind::ConnectionResetError,
                format!("unknown sync id {:?}", String::from_utf8_lossy(&raw)),
            )
        })
    }

    /// Reads `OKAY`, or turns `FAIL` + message into a server error.
    pub async fn read_status(&mut self, request: &str) -> Result<()> {
        let raw = self.read_octet_string().await?;
        match Status::from_bytes(&raw) {
            Some(Status::Okay) => Ok(()),
            Some(Status::Fail) => Err(self.read_fail_message(request).await),
            None => Err(unexpected_status(request, &raw)),
        }
    }

    /// Reads the message that follows a `FAIL` id and builds the error for it.
    pub async fn read_fail_message(&mut self, request: &str) -> Error {
        match self.read_bytes().await {
            Ok(msg) => Error::server(request, String::from_utf8_lossy(&msg)),
            Err(e) => e.wrap("error reading server error message"),
        }
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.transport.read_full(&mut raw, "int32").await?;
        Ok(i32::from_le_bytes(raw))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.transport.read_full(&mut raw, "uint32").await?;
        Ok(u32::from_le_bytes(raw))
    }

    pub async fn read_file_mode(&mut self) -> Result<FileMode> {
        Ok(FileMode::from_adb(self.read_u32().await?))
    }

    pub async fn read_time(&mut self) -> Result<DateTime<Utc>> {
        let secs = self.read_u32().await?;
        Ok(DateTime::from_timestamp(i64::from(secs), 0).unwrap_or(DateTime::UNIX_EPOCH))
    }

    /// Reads a length-prefixed string. Bytes that are not UTF-8 are a
    /// [`ErrorKind::ParseError`] since the string could not be sent back
    /// unchanged.
    pub async fn read_string(&mut self) -> Result<String> {
        let len = self.read_length("string").await?;
        let mut buf = vec![0u8; len];
        self.transport.read_full(&mut buf, "string").await?;
        String::from_utf8(buf).map_err(|e| {
            Error::with_source(ErrorKind::ParseError, "string is not valid UTF-8", e)
        })
    }

    pub async fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_length("bytes").await?;
        let mut buf = BytesMut::zeroed(len);
        self.transport.read_full(&mut buf, "bytes").await?;
        Ok(buf.freeze())
    }

    async fn read_length(&mut self, what: &str) -> Result<usize> {
        let len = self.read_u32().await? as usize;
        // Guards allocation against a corrupt stream.
        if len > SYNC_MAX_CHUNK_SIZE {
            return Err(Error::parse(format!(
                "{what} length {len} exceeds maximum {SYNC_MAX_CHUNK_SIZE}"
            )));
        }
        Ok(len)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
