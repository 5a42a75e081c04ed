//! Host services: questions for the adb server itself rather than a device.

use std::sync::Arc;

use crate::config::{Config, WatcherConfig};
use crate::device::{
    parse_device_list, parse_device_long, parse_device_short, Device, DeviceDescriptor, DeviceInfo,
};
use crate::error::{Error, ErrorKind, Result};
use crate::server::{close_conn, round_trip_single_response, AdbServer, Server};
use crate::watcher::DeviceWatcher;
use crate::wire::Conn;

/// Entry point for talking to an adb server.
///
/// Cheap to clone; every operation opens its own connection.
#[derive(Clone)]
pub struct Adb {
    server: Arc<dyn Server>,
    watcher_config: WatcherConfig,
}

impl Adb {
    /// Connects to the server described by `config`.
    ///
    /// `ANDROID_ADB_SERVER_PORT` and `ADB_SERVER_HOST` take precedence over
    /// `config.server`.
    pub fn new(config: Config) -> Self {
        Self {
            server: Arc::new(AdbServer::new(config.server.with_env_overrides())),
            watcher_config: config.watcher,
        }
    }

    pub fn with_server(server: Arc<dyn Server>, watcher_config: WatcherConfig) -> Self {
        Self {
            server,
            watcher_config,
        }
    }

    pub fn server(&self) -> &Arc<dyn Server> {
        &self.server
    }

    pub async fn dial(&self) -> Result<Conn> {
        self.server.dial().await
    }

    pub async fn start_server(&self) -> Result<()> {
        self.server.start().await
    }

    pub fn device(&self, descriptor: DeviceDescriptor) -> Device {
        Device::new(self.server.clone(), descriptor)
    }

    /// Returns the device with `serial`, checking that the server knows it.
    pub async fn device_by_serial(&self, serial: &str) -> Result<Device> {
        let device = self.device(DeviceDescriptor::Serial(serial.to_string()));
        match device.serial().await {
            Ok(_) => Ok(device),
            Err(e) => Err(Error::with_source(
                ErrorKind::DeviceNotFound,
                format!("Device with serial {serial} not found"),
                e,
            )),
        }
    }

    /// Starts a [`DeviceWatcher`] on this server.
    pub fn new_device_watcher(&self) -> DeviceWatcher {
        DeviceWatcher::new(self.server.clone(), self.watcher_config.clone())
    }

    /// The server's internal protocol version.
    pub async fn server_version(&self) -> Result<u32> {
        let resp = round_trip_single_response(self.server.as_ref(), "host:version")
            .await
            .map_err(|e| wrap(e, "GetServerVersion"))?;
        parse_server_version(&resp).map_err(|e| wrap(e, "GetServerVersion"))
    }

    /// Asks the server to exit. No reply is expected.
    pub async fn kill_server(&self) -> Result<()> {
        let mut conn = self.server.dial().await.map_err(|e| wrap(e, "KillServer"))?;
        let result = conn.send_message_string("host:kill").await;
        close_conn(&mut conn).await;
        result.map_err(|e| wrap(e, "KillServer"))
    }

    /// Serials of all attached devices (`adb devices`).
    pub async fn list_device_serials(&self) -> Result<Vec<String>> {
        let resp = round_trip_single_response(self.server.as_ref(), "host:devices")
            .await
            .map_err(|e| wrap(e, "ListDeviceSerials"))?;
        let devices = parse_device_list(&String::from_utf8_lossy(&resp), parse_device_short)
            .map_err(|e| wrap(e, "ListDeviceSerials"))?;
        Ok(devices.into_iter().map(|info| info.serial).collect())
    }

    /// All attached devices with their attributes (`adb devices -l`).
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        list_devices_on(self.server.as_ref())
            .await
            .map_err(|e| wrap(e, "ListDevices"))
    }

    /// Connects the server to a device over TCP/IP (`adb connect`).
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let request = format!("host:connect:{host}:{port}");
        round_trip_single_response(self.server.as_ref(), &request)
            .await
            .map(drop)
            .map_err(|e| wrap(e, "Connect"))
    }

    pub async fn disconnect(&self, addr: &str) -> Result<()> {
        let request = format!("host:disconnect:{addr}");
        round_trip_single_response(self.server.as_ref(), &request)
            .await
            .map(drop)
            .map_err(|e| wrap(e, "Disconnect"))
    }

    pub async fn disconnect_all(&self) -> Result<()> {
        round_trip_single_response(self.server.as_ref(), "host:disconnect:")
            .await
            .map(drop)
            .map_err(|e| wrap(e, "DisconnectAll"))
    }
}

impl std::fmt::Debug for Adb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adb")
            .field("watcher_config", &self.watcher_config)
            .finish_non_exhaustive()
    }
}

pub(crate) async fn list_devices_on(server: &dyn Server) -> Result<Vec<DeviceInfo>> {
    let resp = round_trip_single_response(server, "host:devices-l").await?;
    parse_device_list(&String::from_utf8_lossy(&resp), parse_device_long)
}

fn parse_server_version(raw: &[u8]) -> Result<u32> {
    let text = String::from_utf8_lossy(raw);
    u32::from_str_radix(text.trim(), 16).map_err(|e| {
        Error::with_source(
            ErrorKind::ParseError,
            format!("error parsing server version: {text}"),
            e,
        )
    })
}

fn wrap(err: Error, operation: &str) -> Error {
    err.wrap(format!("error performing {operation} on server"))
}
