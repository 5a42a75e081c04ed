//! `STAT` and `LIST` over a sync connection.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::{Error, ErrorKind, Result};
use crate::wire::{FileMode, SyncConn, SyncTag};

/// One file as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Empty for entries returned by [`stat`].
    pub name: String,
    pub mode: FileMode,
    pub size: i32,
    pub modified_at: DateTime<Utc>,
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>10} {} {}",
            self.mode,
            self.size,
            self.modified_at.format("%Y-%m-%d %H:%M:%S"),
            self.name
        )
    }
}

/// Reads the `mode | size | mtime` tuple shared by `STAT` and `DENT`.
///
/// An all-zero tuple means the path does not exist.
async fn read_stat(conn: &mut SyncConn) -> Result<DirEntry> {
    let mode = conn.read_file_mode().await?;
    let size = conn.read_i32().await?;
    let modified_at = conn.read_time().await?;

    if mode.to_adb() == 0 && size == 0 && modified_at.timestamp() == 0 {
        return Err(Error::new(
            ErrorKind::FileNoExistError,
            "file doesn't exist",
        ));
    }

    Ok(DirEntry {
        name: String::new(),
        mode,
        size,
        modified_at,
    })
}

/// Stats `path` on the device. The returned entry has no name.
pub async fn stat(conn: &mut SyncConn, path: &str) -> Result<DirEntry> {
    conn.send_request(SyncTag::Stat, path).await?;

    let id = conn.read_octet_string().await?;
    if &id != SyncTag::Stat.as_bytes() {
        return Err(Error::new(
            ErrorKind::ConnectionResetError,
            format!(
                "expected stat ID 'STAT', but got '{}'",
                String::from_utf8_lossy(&id)
            ),
        ));
    }

    read_stat(conn).await
}

/// Starts listing `path`. Entries are read lazily from the returned cursor.
pub async fn list_dir_entries(mut conn: SyncConn, path: &str) -> Result<DirEntries> {
    if let Err(e) = conn.send_request(SyncTag::List, path).await {
        if let Err(close_err) = conn.close().await {
            tracing::warn!("error closing sync connection: {}", close_err);
        }
        return Err(e);
    }
    Ok(DirEntries { conn: Some(conn) })
}

/// Forward-only cursor over a `LIST` reply.
///
/// The connection is released once the listing ends, fails, or is closed
/// early. Dropping the cursor releases it as well.
#[derive(Debug)]
pub struct DirEntries {
    conn: Option<SyncConn>,
}

impl DirEntries {
    /// Returns the next entry, or `None` once the device sent `DONE`.
    ///
    /// After `None` or an error the cursor is exhausted and keeps returning
    /// `None`.
    pub async fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };

        match read_next_entry(conn).await {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                self.close().await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(close_err) = self.close().await {
                    tracing::warn!("error closing sync connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Collects the remaining entries.
    pub async fn read_all(mut self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Releases the connection without reading further. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.conn.is_none()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DirEntry>> {
        futures::stream::try_unfold(self, |mut entries| async move {
            Ok::<_, Error>(entries.next_entry().await?.map(|entry| (entry, entries)))
        })
    }
}

async fn read_next_entry(conn: &mut SyncConn) -> Result<Option<DirEntry>> {
    let id = conn.read_octet_string().await?;
    match SyncTag::from_bytes(&id) {
        Some(SyncTag::Dent) => {}
        Some(SyncTag::Done) => return Ok(None),
        _ => {
            return Err(Error::new(
                ErrorKind::ConnectionResetError,
                format!(
                    "expected dir entry ID 'DENT', but got '{}'",
                    String::from_utf8_lossy(&id)
                ),
            ))
        }
    }

    let mut entry = read_stat(conn)
        .await
        .map_err(|e| e.wrap("error reading dir entry"))?;
    entry.name = conn
        .read_string()
        .await
        .map_err(|e| e.wrap("error reading dir entry name"))?;
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mock_transport, sync_string, MockHandle};
    use crate::wire::filemode::{FileType, MODE_DIR, MODE_REGULAR};
    use futures::TryStreamExt;

    fn stat_tuple(mode: u32, size: i32, mtime: u32) -> Vec<u8> {
        let mut out = mode.to_le_bytes().to_vec();
        out.extend(size.to_le_bytes());
        out.extend(mtime.to_le_bytes());
        out
    }

    fn dent(name: &str, mode: u32, size: i32, mtime: u32) -> Vec<u8> {
        let mut out = b"DENT".to_vec();
        out.extend(stat_tuple(mode, size, mtime));
        out.extend(sync_string(name));
        out
    }

    fn sync_conn(input: Vec<u8>) -> (SyncConn, MockHandle) {
        let (transport, handle) = mock_transport(input);
        (SyncConn::new(transport), handle)
    }

    #[tokio::test]
    async fn test_stat_valid() {
        let mut input = b"STAT".to_vec();
        input.extend(stat_tuple(0o777, 4, 1_430_640_488));
        let (mut conn, handle) = sync_conn(input);

        let entry = stat(&mut conn, "/thing").await.unwrap();
        assert_eq!(entry.mode.permissions().bits(), 0o777);
        assert_eq!(entry.size, 4);
        assert_eq!(entry.modified_at.timestamp(), 1_430_640_488);
        assert_eq!(entry.name, "");

        let mut expected = b"STAT".to_vec();
        expected.extend(sync_string("/thing"));
        assert_eq!(handle.written(), expected);
    }

    #[tokio::test]
    async fn test_stat_bad_response() {
        let (mut conn, _) = sync_conn(b"SPAT".to_vec());

        let err = stat(&mut conn, "/").await.unwrap_err();
        assert!(err.to_string().contains("but got 'SPAT'"));
    }

    #[tokio::test]
    async fn test_stat_no_exist() {
        let mut input = b"STAT".to_vec();
        input.extend(stat_tuple(0, 0, 0));
        let (mut conn, _) = sync_conn(input);

        let err = stat(&mut conn, "/nonexistent").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNoExistError);
    }

    #[tokio::test]
    async fn test_list_read_all() {
        let mut input = dent("foo", MODE_REGULAR | 0o644, 42, 1_000);
        input.extend(dent("bar", MODE_DIR | 0o755, 0, 2_000));
        input.extend_from_slice(b"DONE");
        input.extend(stat_tuple(0, 0, 0));
        let (conn, handle) = sync_conn(input);

        let entries = list_dir_entries(conn, "/sdcard")
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "foo");
        assert_eq!(entries[0].size, 42);
        assert_eq!(entries[0].mode.file_type(), FileType::Regular);
        assert_eq!(entries[1].name, "bar");
        assert!(entries[1].mode.is_dir());
        assert_eq!(handle.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_list_done_is_terminal() {
        let (conn, handle) = sync_conn(b"DONE".to_vec());
        let mut entries = list_dir_entries(conn, "/empty").await.unwrap();

        assert!(entries.next_entry().await.unwrap().is_none());
        assert!(entries.is_done());
        assert!(entries.next_entry().await.unwrap().is_none());
        assert_eq!(handle.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_list_invalid_id() {
        let (conn, handle) = sync_conn(b"INVA".to_vec());
        let mut entries = list_dir_entries(conn, "/").await.unwrap();

        let err = entries.next_entry().await.unwrap_err();
        assert!(err
            .to_string()
            .contains("expected dir entry ID 'DENT', but got 'INVA'"));
        assert!(entries.next_entry().await.unwrap().is_none());
        assert_eq!(handle.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_list_truncated_entry() {
        let mut input = b"DENT".to_vec();
        input.extend(0o644u32.to_le_bytes());
        let (conn, _) = sync_conn(input);
        let mut entries = list_dir_entries(conn, "/").await.unwrap();

        let err = entries.next_entry().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionResetError);
    }

    #[tokio::test]
    async fn test_list_close_early() {
        let mut input = dent("a", 0o644, 1, 1);
        input.extend(dent("b", 0o644, 1, 1));
        let (conn, handle) = sync_conn(input);
        let mut entries = list_dir_entries(conn, "/").await.unwrap();

        assert!(entries.next_entry().await.unwrap().is_some());
        entries.close().await.unwrap();
        entries.close().await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert_eq!(handle.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_list_as_stream() {
        let mut input = dent("one", 0o644, 1, 1);
        input.extend(dent("two", 0o644, 2, 2));
        input.extend_from_slice(b"DONE");
        let (conn, _) = sync_conn(input);

        let names: Vec<String> = list_dir_entries(conn, "/")
            .await
            .unwrap()
            .into_stream()
            .map_ok(|entry| entry.name)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["one", "two"]);
    }
}
