//! Wire codecs for the adb host and sync protocols.

pub mod conn;
pub mod filemode;
pub mod protocol;
pub mod sync_conn;

pub use conn::Conn;
pub use filemode::{FileMode, FileType, Permissions};
pub use protocol::{Status, SyncTag, MAX_MESSAGE_LENGTH, SYNC_MAX_CHUNK_SIZE};
pub use sync_conn::SyncConn;
