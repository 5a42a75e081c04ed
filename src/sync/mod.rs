//! File operations over the sync protocol: stat, list, send and receive.
//!
//! Every operation takes a [`SyncConn`](crate::wire::SyncConn) obtained from
//! [`Conn::into_sync_conn`](crate::wire::Conn::into_sync_conn). Listing,
//! sending and receiving own their connection until they finish.

pub mod dir_entries;
pub mod receiver;
pub mod sender;

pub use dir_entries::{list_dir_entries, stat, DirEntries, DirEntry};
pub use receiver::{receive_file, FileReceiver};
pub use sender::{send_file, FileSender, MTIME_OF_CLOSE};
