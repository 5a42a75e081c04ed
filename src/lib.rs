//! Async client for the Android Debug Bridge.
//!
//! Talks to a running adb server over its text-framed host protocol and to
//! devices over the binary sync protocol. [`Adb`] is the entry point for
//! server-level requests; [`Device`] covers shell commands and file transfer;
//! [`DeviceWatcher`] streams device state changes and reconnects on its own.
//!
//! ```no_run
//! use adb_bridge::{Adb, Config, DeviceDescriptor};
//!
//! # async fn demo() -> adb_bridge::Result<()> {
//! let adb = Adb::new(Config::default());
//! println!("server version {}", adb.server_version().await?);
//!
//! let device = adb.device(DeviceDescriptor::AnyDevice);
//! let out = device.run_command("getprop", &["ro.product.model"]).await?;
//! println!("{}", out.trim());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod device_state;
pub mod dialer;
pub mod error;
pub mod server;
pub mod sync;
pub mod transport;
pub mod watcher;
pub mod wire;

#[cfg(test)]
mod testutil;

pub use client::Adb;
pub use config::{Config, ServerConfig, WatcherConfig};
pub use device::{prepare_command_line, Device, DeviceDescriptor, DeviceInfo};
pub use device_state::DeviceState;
pub use dialer::{Dialer, TcpDialer};
pub use error::{has_kind, Error, ErrorKind, Result};
pub use server::{AdbServer, Server};
pub use sync::{DirEntries, DirEntry, FileReceiver, FileSender, MTIME_OF_CLOSE};
pub use watcher::{DeviceStateChangedEvent, DeviceWatcher};
pub use wire::{FileMode, FileType, Permissions};
