//! Per-device services: attributes, shell commands and file transfer.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::client::list_devices_on;
use crate::device_state::DeviceState;
use crate::error::{Error, ErrorKind, Result};
use crate::server::{close_conn, round_trip_single_response, Server};
use crate::sync::{self, DirEntries, DirEntry, FileReceiver, FileSender};
use crate::wire::{Conn, FileMode, Permissions, SyncConn};

/// Which device a [`Device`] talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceDescriptor {
    /// The only connected device; fails if there are several.
    AnyDevice,
    AnyUsbDevice,
    AnyLocalDevice,
    Serial(String),
}

impl DeviceDescriptor {
    /// Prefix for `<prefix>:<attr>` host queries.
    pub fn host_prefix(&self) -> String {
        match self {
            DeviceDescriptor::AnyDevice => "host".to_string(),
            DeviceDescriptor::AnyUsbDevice => "host-usb".to_string(),
            DeviceDescriptor::AnyLocalDevice => "host-local".to_string(),
            DeviceDescriptor::Serial(serial) => format!("host-serial:{serial}"),
        }
    }

    /// Selector sent as `host:<descriptor>` to switch a connection to the device.
    pub fn transport_descriptor(&self) -> String {
        match self {
            DeviceDescriptor::AnyDevice => "transport-any".to_string(),
            DeviceDescriptor::AnyUsbDevice => "transport-usb".to_string(),
            DeviceDescriptor::AnyLocalDevice => "transport-local".to_string(),
            DeviceDescriptor::Serial(serial) => format!("transport:{serial}"),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDescriptor::AnyDevice => f.write_str("AnyDevice"),
            DeviceDescriptor::AnyUsbDevice => f.write_str("AnyUsbDevice"),
            DeviceDescriptor::AnyLocalDevice => f.write_str("AnyLocalDevice"),
            DeviceDescriptor::Serial(serial) => write!(f, "DeviceWithSerial[{serial}]"),
        }
    }
}

/// A row of `adb devices` / `adb devices -l`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    /// Raw state token, e.g. `device` or `offline`.
    pub state: String,
    pub product: String,
    pub model: String,
    pub device_info: String,
    pub usb: String,
    pub transport_id: String,
}

impl DeviceInfo {
    /// True for USB devices (the long listing carries a `usb:` attribute).
    pub fn is_usb(&self) -> bool {
        !self.usb.is_empty()
    }

    /// The state token decoded as a [`DeviceState`].
    pub fn device_state(&self) -> Result<DeviceState> {
        self.state.parse()
    }
}

/// Parses `serial<ws>state` lines.
pub fn parse_device_short(line: &str) -> Result<DeviceInfo> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(serial), Some(state)) => Ok(DeviceInfo {
            serial: serial.to_string(),
            state: state.to_string(),
            ..DeviceInfo::default()
        }),
        _ => Err(Error::parse(format!(
            "malformed device line, expected 2 fields: {line:?}"
        ))),
    }
}

/// Parses `serial<ws>state<ws>key:value ...` lines. Unknown keys are ignored.
pub fn parse_device_long(line: &str) -> Result<DeviceInfo> {
    let mut info = parse_device_short(line)?;
    for field in line.split_whitespace().skip(2) {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let slot = match key {
            "product" => &mut info.product,
            "model" => &mut info.model,
            "device" => &mut info.device_info,
            "usb" => &mut info.usb,
            "transport_id" => &mut info.transport_id,
            _ => continue,
        };
        *slot = value.to_string();
    }
    Ok(info)
}

/// Applies `parse` to every non-blank line of `text`.
pub fn parse_device_list(
    text: &str,
    parse: fn(&str) -> Result<DeviceInfo>,
) -> Result<Vec<DeviceInfo>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse)
        .collect()
}

/// Validates a command and its arguments and joins them into one shell line.
///
/// Arguments containing whitespace are double-quoted; arguments containing a
/// double quote are rejected.
pub fn prepare_command_line(cmd: &str, args: &[&str]) -> Result<String> {
    if cmd.trim().is_empty() {
        return Err(Error::assertion("command cannot be empty"));
    }

    let mut line = cmd.to_string();
    for (i, arg) in args.iter().enumerate() {
        if arg.contains('"') {
            return Err(Error::parse(format!(
                "arg at index {i} contains an invalid double quote: {arg}"
            )));
        }
        line.push(' ');
        if arg.chars().any(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    Ok(line)
}

/// A handle for talking to one device through the adb server.
///
/// Each call opens its own connection.
#[derive(Clone)]
pub struct Device {
    server: Arc<dyn Server>,
    descriptor: DeviceDescriptor,
}

impl Device {
    pub fn new(server: Arc<dyn Server>, descriptor: DeviceDescriptor) -> Self {
        Self { server, descriptor }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub async fn serial(&self) -> Result<String> {
        self.get_attribute("get-serialno")
            .await
            .map_err(|e| self.wrap(e, "Serial"))
    }

    pub async fn device_path(&self) -> Result<String> {
        self.get_attribute("get-devpath")
            .await
            .map_err(|e| self.wrap(e, "DevicePath"))
    }

    /// Current state. A server error mentioning "unauthorized" means
    /// [`DeviceState::Unauthorized`] rather than a failure.
    pub async fn state(&self) -> Result<DeviceState> {
        match self.get_attribute("get-state").await {
            Ok(attr) => attr.parse::<DeviceState>().map_err(|e| self.wrap(e, "State")),
            Err(e) if e.to_string().contains("unauthorized") => Ok(DeviceState::Unauthorized),
            Err(e) => Err(self.wrap(e, "State")),
        }
    }

    /// This device's row from `adb devices -l`.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let serial = self.serial().await?;
        let devices = list_devices_on(self.server.as_ref())
            .await
            .map_err(|e| self.wrap(e, "DeviceInfo(ListDevices)"))?;

        devices
            .into_iter()
            .find(|info| info.serial == serial)
            .ok_or_else(|| {
                self.wrap(
                    Error::new(
                        ErrorKind::DeviceNotFound,
                        format!("device list doesn't contain serial {serial}"),
                    ),
                    "DeviceInfo",
                )
            })
    }

    /// Runs `cmd args...` in a non-interactive shell and returns its output.
    pub async fn run_command(&self, cmd: &str, args: &[&str]) -> Result<String> {
        self.run_shell(cmd, args, None)
            .await
            .map_err(|e| self.wrap(e, "RunCommand"))
    }

    /// Like [`run_command`](Self::run_command), failing with
    /// [`ErrorKind::CommandTimeout`] if the output has not finished within
    /// `timeout`.
    pub async fn run_command_with_timeout(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String> {
        self.run_shell(cmd, args, Some(timeout))
            .await
            .map_err(|e| self.wrap(e, "RunCommandWithTimeout"))
    }

    async fn run_shell(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<String> {
        let line = prepare_command_line(cmd, args)?;
        let mut conn = self.dial_device().await?;
        let result = shell_on(&mut conn, &line, timeout).await;
        close_conn(&mut conn).await;
        result
    }

    /// Asks adbd to remount the system partitions read-write.
    pub async fn remount(&self) -> Result<String> {
        let result = async {
            let mut conn = self.dial_device().await?;
            let resp = conn.round_trip_single_response(b"remount").await;
            close_conn(&mut conn).await;
            resp
        }
        .await;
        result
            .map(|resp| String::from_utf8_lossy(&resp).into_owned())
            .map_err(|e| self.wrap(e, "Remount"))
    }

    pub async fn stat(&self, path: &str) -> Result<DirEntry> {
        let result = async {
            let mut conn = self.sync_conn().await?;
            let entry = sync::stat(&mut conn, path).await;
            if let Err(e) = conn.close().await {
                tracing::warn!("error closing sync connection: {}", e);
            }
            entry
        }
        .await;
        result.map_err(|e| self.wrap(e, format!("Stat({path})")))
    }

    pub async fn list_dir_entries(&self, path: &str) -> Result<DirEntries> {
        let result = async {
            let conn = self.sync_conn().await?;
            sync::list_dir_entries(conn, path).await
        }
        .await;
        result.map_err(|e| self.wrap(e, format!("ListDirEntries({path})")))
    }

    pub async fn open_read(&self, path: &str) -> Result<FileReceiver> {
        let result = async {
            let conn = self.sync_conn().await?;
            sync::receive_file(conn, path).await
        }
        .await;
        result.map_err(|e| self.wrap(e, format!("OpenRead({path})")))
    }

    /// Opens `path` for writing, creating it with `mode` if needed.
    ///
    /// `mtime` is applied on close; pass [`MTIME_OF_CLOSE`](crate::sync::MTIME_OF_CLOSE)
    /// to use the close time.
    pub async fn open_write(
        &self,
        path: &str,
        mode: FileMode,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<FileSender> {
        let result = async {
            let conn = self.sync_conn().await?;
            sync::send_file(conn, path, mode, mtime).await
        }
        .await;
        result.map_err(|e| self.wrap(e, format!("OpenWrite({path})")))
    }

    /// Copies a local file to `remote`, keeping its permissions and mtime.
    /// Returns the number of bytes sent.
    pub async fn push_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let local_err = |e: std::io::Error| {
            Error::with_source(
                ErrorKind::AssertionError,
                format!("cannot read local file {}", local.display()),
                e,
            )
        };
        let mut file = fs::File::open(local).await.map_err(local_err)?;
        let meta = file.metadata().await.map_err(local_err)?;

        let mode = FileMode::from(local_permissions(&meta));
        let mtime = meta.modified().ok().map(DateTime::<Utc>::from);

        let mut sender = self.open_write(remote, mode, mtime).await?;
        let sent = match sender.write_from(&mut file).await {
            Ok(sent) => sent,
            Err(e) => {
                if let Err(abort_err) = sender.abort().await {
                    tracing::warn!("error aborting push to {}: {}", remote, abort_err);
                }
                return Err(self.wrap(e, format!("PushFile({remote})")));
            }
        };
        sender
            .close()
            .await
            .map_err(|e| self.wrap(e, format!("PushFile({remote})")))?;

        tracing::debug!("pushed {} -> {} ({} bytes)", local.display(), remote, sent);
        Ok(sent)
    }

    /// Copies `remote` to a local file and applies the device mtime and
    /// permissions. Returns the number of bytes received.
    pub async fn pull_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let entry = self.stat(remote).await?;
        let mut reader = self.open_read(remote).await?.into_async_read();

        let mut file = fs::File::create(local).await.map_err(|e| {
            Error::with_source(
                ErrorKind::AssertionError,
                format!("cannot create local file {}", local.display()),
                e,
            )
        })?;
        let received = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| self.wrap(from_copy_error(remote, e), format!("PullFile({remote})")))?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(entry.mode.permissions().bits());
            if let Err(e) = fs::set_permissions(local, perms).await {
                tracing::warn!("Failed to set permissions on {}: {}", local.display(), e);
            }
        }

        let mtime = filetime::FileTime::from_unix_time(entry.modified_at.timestamp(), 0);
        let path = local.to_path_buf();
        match tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to set mtime on {}: {}", local.display(), e),
            Err(e) => tracing::warn!("Failed to set mtime on {}: {}", local.display(), e),
        }

        tracing::debug!("pulled {} -> {} ({} bytes)", remote, local.display(), received);
        Ok(received)
    }

    async fn get_attribute(&self, attr: &str) -> Result<String> {
        let request = format!("{}:{}", self.descriptor.host_prefix(), attr);
        let resp = round_trip_single_response(self.server.as_ref(), &request).await?;
        Ok(String::from_utf8_lossy(&resp).into_owned())
    }

    /// Dials the server and switches the connection to this device.
    async fn dial_device(&self) -> Result<Conn> {
        let mut conn = self.server.dial().await?;
        let request = format!("host:{}", self.descriptor.transport_descriptor());

        let switched = async {
            conn.send_message_string(&request)
                .await
                .map_err(|e| e.wrap(format!("error connecting to device '{}'", self.descriptor)))?;
            conn.read_status(&request).await
        }
        .await;

        match switched {
            Ok(()) => Ok(conn),
            Err(e) => {
                close_conn(&mut conn).await;
                Err(e)
            }
        }
    }

    async fn sync_conn(&self) -> Result<SyncConn> {
        self.dial_device().await?.into_sync_conn().await
    }

    fn wrap(&self, err: Error, operation: impl fmt::Display) -> Error {
        err.wrap(format!("error performing {operation} on {}", self.descriptor))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.descriptor.fmt(f)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Sends `shell:<line>` and reads the output until the device closes it.
///
/// Shell output has no length header. With a `timeout`, the read is dropped
/// once it expires.
async fn shell_on(conn: &mut Conn, line: &str, timeout: Option<Duration>) -> Result<String> {
    let request = format!("shell:{line}");
    conn.send_message_string(&request).await?;
    conn.read_status(&request).await?;

    let output = match timeout {
        None => conn.read_until_eof().await?,
        Some(limit) => tokio::time::timeout(limit, conn.read_until_eof())
            .await
            .map_err(|elapsed| {
                Error::with_source(
                    ErrorKind::CommandTimeout,
                    format!("command timed out after {limit:?}"),
                    elapsed,
                )
            })??,
    };
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Recovers the protocol error carried through an [`AsyncRead`] adapter.
fn from_copy_error(remote: &str, err: std::io::Error) -> Error {
    match err.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
        Some(inner) => inner.clone(),
        None => Error::io(format!("error pulling {remote}"), err),
    }
}

fn local_permissions(meta: &std::fs::Metadata) -> Permissions {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Permissions::from_bits_truncate(meta.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Permissions::from_bits_truncate(0o644)
    }
}
