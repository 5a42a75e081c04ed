//! `RECV`: reads a file from the device as a sequence of DATA frames.

use std::io;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{Error, ErrorKind, Result};
use crate::wire::{SyncConn, SyncTag};

/// Requests `path` from the device.
///
/// The first reply id is read before returning, so a missing or unreadable
/// file fails here rather than on the first read.
pub async fn receive_file(mut conn: SyncConn, path: &str) -> Result<FileReceiver> {
    let first = async {
        conn.send_request(SyncTag::Recv, path).await?;
        read_chunk(&mut conn, path).await
    }
    .await;

    let mut receiver = FileReceiver {
        conn: Some(conn),
        path: path.to_string(),
        pending: None,
    };
    match first {
        Ok(Some(chunk)) => receiver.pending = Some(chunk),
        Ok(None) => receiver.release().await,
        Err(e) => {
            receiver.release().await;
            return Err(e);
        }
    }
    Ok(receiver)
}

/// Reads one frame: `Some(data)` for DATA, `None` for DONE.
async fn read_chunk(conn: &mut SyncConn, path: &str) -> Result<Option<Bytes>> {
    let id = conn.read_octet_string().await?;
    match SyncTag::from_bytes(&id) {
        Some(SyncTag::Data) => Ok(Some(conn.read_bytes().await?)),
        Some(SyncTag::Done) => Ok(None),
        Some(SyncTag::Fail) => Err(conn.read_fail_message(&format!("RECV {path}")).await),
        _ => Err(Error::new(
            ErrorKind::ConnectionResetError,
            format!(
                "expected chunk id 'DATA', but got '{}'",
                String::from_utf8_lossy(&id)
            ),
        )),
    }
}

/// Source for the contents of a file being received.
#[derive(Debug)]
pub struct FileReceiver {
    conn: Option<SyncConn>,
    path: String,
    pending: Option<Bytes>,
}

impl FileReceiver {
    /// Returns the next DATA payload, or `None` after `DONE`.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some(chunk));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };

        match read_chunk(conn, &self.path).await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.release().await;
                Ok(None)
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }

    /// Reads the rest of the file into memory.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut receiver| async move {
            Ok::<_, Error>(receiver.next_chunk().await?.map(|chunk| (chunk, receiver)))
        })
    }

    /// Adapts the receiver into an [`AsyncRead`].
    ///
    /// Protocol errors surface as [`io::Error`]s wrapping the original
    /// [`Error`], so `has_kind` still finds their kind.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(Box::pin(self.into_stream().map_err(io::Error::other)))
    }

    /// Drops the connection without reading the rest of the file.
    pub async fn close(&mut self) -> Result<()> {
        self.pending = None;
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }

    async fn release(&mut self) {
        if let Err(e) = self.close().await {
            tracing::warn!("error closing sync connection for {}: {}", self.path, e);
        }
    }
}
