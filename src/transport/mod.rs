//! Owned duplex byte stream to the adb server.
//!
//! A [`Transport`] is produced by a [`Dialer`](crate::dialer::Dialer) and then
//! owned by exactly one codec at a time. Closing is idempotent: the first
//! result is remembered and returned by every later call.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorKind, Result};

/// Anything we can speak the adb protocols over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub struct Transport {
    stream: Option<Box<dyn AsyncStream>>,
    close_result: Option<Result<()>>,
    peer: String,
}

impl Transport {
    pub fn new(stream: impl AsyncStream + 'static, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            close_result: None,
            peer: peer.into(),
        }
    }

    /// Address (or label) of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn AsyncStream>> {
        self.stream.as_mut().ok_or_else(|| {
            Error::new(
                ErrorKind::NetworkError,
                format!("transport to {} is closed", self.peer),
            )
        })
    }

    /// Fills `buf` completely.
    ///
    /// End-of-stream before `buf` is full is reported as an incomplete read
    /// naming `what`.
    pub async fn read_full(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let stream = self.stream_mut()?;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]).await {
                Ok(0) => return Err(Error::incomplete(what, filled, buf.len())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(format!("error reading {what}"), e)),
            }
        }
        Ok(())
    }

    /// Reads until the remote closes its write side.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        let mut out = Vec::new();
        stream
            .read_to_end(&mut out)
            .await
            .map_err(|e| Error::io("error reading until EOF", e))?;
        Ok(out)
    }

    /// Writes all of `data` and flushes.
    pub async fn write_all(&mut self, data: &[u8], what: &str) -> Result<()> {
        let stream = self.stream_mut()?;
        stream
            .write_all(data)
            .await
            .map_err(|e| Error::io(format!("error writing {what}"), e))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::io(format!("error flushing {what}"), e))
    }

    /// Shuts the stream down and releases it.
    ///
    /// Safe to call any number of times; every call returns the outcome of the
    /// first one.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(result) = &self.close_result {
            return result.clone();
        }

        let result = match self.stream.take() {
            Some(mut stream) => match stream.shutdown().await {
                Ok(()) => Ok(()),
                // The peer hanging up first is not a close failure.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(Error::io(format!("error closing transport to {}", self.peer), e)),
            },
            None => Ok(()),
        };

        if let Err(e) = &result {
            tracing::warn!("{}", e);
        }
        self.close_result = Some(result.clone());
        result
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
