//! Host-protocol codec.
//!
//! Requests are hex-length-prefixed strings. Replies start with a 4-byte
//! status, optionally followed by one length-prefixed message, or (for shell
//! commands) by raw output until the server closes the connection.

use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::wire::protocol::{decode_length_header, encode_host_message, Status};
use crate::wire::SyncConn;

/// A connection speaking the host protocol.
#[derive(Debug)]
pub struct Conn {
    transport: Transport,
}

impl Conn {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub async fn send_message(&mut self, msg: &[u8]) -> Result<()> {
        let frame = encode_host_message(msg)?;
        self.transport.write_all(&frame, "message").await
    }

    pub async fn send_message_string(&mut self, msg: &str) -> Result<()> {
        self.send_message(msg.as_bytes()).await
    }

    /// Reads one length-prefixed message.
    pub async fn read_message(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.transport.read_full(&mut header, "length").await?;
        let len = decode_length_header(&header)?;

        let mut msg = vec![0u8; len];
        self.transport.read_full(&mut msg, "message").await?;
        Ok(msg)
    }

    /// Reads a reply status for `request`.
    ///
    /// `FAIL` is turned into a server error carrying the text that follows it;
    /// anything other than `OKAY`/`FAIL` is a protocol violation.
    pub async fn read_status(&mut self, request: &str) -> Result<()> {
        let mut raw = [0u8; 4];
        self.transport.read_full(&mut raw, "status").await?;

        match Status::from_bytes(&raw) {
            Some(Status::Okay) => Ok(()),
            Some(Status::Fail) => {
                let msg = self
                    .read_message()
                    .await
                    .map_err(|e| e.wrap("error reading server error message"))?;
                Err(Error::server(request, String::from_utf8_lossy(&msg)))
            }
            None => Err(unexpected_status(request, &raw)),
        }
    }

    /// Reads everything until the server closes. Only shell output uses this.
    pub async fn read_until_eof(&mut self) -> Result<Vec<u8>> {
        self.transport.read_to_end().await
    }

    /// Sends `request`, expects `OKAY`, then returns the single reply message.
    pub async fn round_trip_single_response(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.send_message(request).await?;
        self.read_status(&String::from_utf8_lossy(request)).await?;
        self.read_message().await
    }

    /// Switches this connection into sync mode.
    ///
    /// Consumes the host codec: the transport belongs to the returned
    /// [`SyncConn`] from now on.
    pub async fn into_sync_conn(mut self) -> Result<SyncConn> {
        self.send_message_string("sync:").await?;
        self.read_status("sync").await?;
        Ok(SyncConn::new(self.transport))
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    pub fn into_transport(self) -> Transport {
        self.transport
    }
}

pub(crate) fn unexpected_status(request: &str, raw: &[u8; 4]) -> Error {
    Error::new(
        ErrorKind::ConnectionResetError,
        format!(
            "unexpected status for {request} request: {:?}",
            String::from_utf8_lossy(raw)
        ),
    )
}
