//! `SEND`: writes a file to the device in DATA frames.

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ErrorKind, Result};
use crate::wire::{FileMode, SyncConn, SyncTag, SYNC_MAX_CHUNK_SIZE};

/// Pass as the mtime of [`send_file`] to stamp the file with the time
/// [`FileSender::close`] runs.
///
/// This is a client-side convention only: the wire always carries a concrete
/// timestamp after `DONE`.
pub const MTIME_OF_CLOSE: Option<DateTime<Utc>> = None;

/// Opens `path` for writing with `mode`.
///
/// `mtime` is applied when the sender is closed; see [`MTIME_OF_CLOSE`].
pub async fn send_file(
    mut conn: SyncConn,
    path: &str,
    mode: FileMode,
    mtime: Option<DateTime<Utc>>,
) -> Result<FileSender> {
    let header = format!("{},0{:o}", path, mode.to_adb());
    let sent = async {
        conn.send_tag(SyncTag::Send).await?;
        conn.send_string(&header).await
    }
    .await;

    if let Err(e) = sent {
        if let Err(close_err) = conn.close().await {
            tracing::warn!("error closing sync connection: {}", close_err);
        }
        return Err(e);
    }

    tracing::debug!("sending {}", header);
    Ok(FileSender {
        conn: Some(conn),
        mtime,
        bytes_sent: 0,
    })
}

/// Sink for the contents of a file being sent.
///
/// Nothing is committed on the device until [`close`](Self::close) succeeds.
#[derive(Debug)]
pub struct FileSender {
    conn: Option<SyncConn>,
    mtime: Option<DateTime<Utc>>,
    bytes_sent: u64,
}

impl FileSender {
    /// Sends `data`, split into DATA frames of at most 64 KiB.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let conn = self.conn_mut()?;
        for chunk in data.chunks(SYNC_MAX_CHUNK_SIZE) {
            conn.send_tag(SyncTag::Data).await?;
            conn.send_bytes(chunk).await?;
        }
        self.bytes_sent += data.len() as u64;
        Ok(data.len())
    }

    /// Copies `reader` to the device until EOF. Returns the byte count.
    pub async fn write_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<u64> {
        let mut buf = vec![0u8; SYNC_MAX_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| {
                Error::with_source(ErrorKind::AssertionError, "error reading local data", e)
            })?;
            if n == 0 {
                return Ok(total);
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Sends `DONE` with the final mtime and waits for the device to accept
    /// the file. The connection is released whatever the outcome.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let mtime = self.mtime.unwrap_or_else(Utc::now);
        let result = async {
            conn.send_tag(SyncTag::Done).await?;
            conn.send_time(mtime).await?;
            conn.read_status("file write").await
        }
        .await;

        let closed = conn.close().await;
        result?;
        closed
    }

    /// Drops the connection without sending `DONE`, so the device discards
    /// the partial file.
    pub async fn abort(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }

    fn conn_mut(&mut self) -> Result<&mut SyncConn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::assertion("write to a closed file sender"))
    }
}
