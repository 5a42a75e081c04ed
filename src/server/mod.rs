//! The background adb server: dialing it and starting it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ServerConfig;
use crate::dialer::{Dialer, TcpDialer};
use crate::error::{Error, ErrorKind, Result};
use crate::wire::Conn;

#[cfg(windows)]
const ADB_EXECUTABLE: &str = "adb.exe";
#[cfg(not(windows))]
const ADB_EXECUTABLE: &str = "adb";

/// What the client needs from an adb server.
#[async_trait]
pub trait Server: Send + Sync {
    /// Opens a fresh host-protocol connection.
    async fn dial(&self) -> Result<Conn>;

    /// Starts the server if it is not already running.
    async fn start(&self) -> Result<()>;
}

/// An adb server reached through a [`Dialer`] and started with the adb
/// executable.
pub struct AdbServer {
    config: ServerConfig,
    address: String,
    dialer: Arc<dyn Dialer>,
}

impl AdbServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    pub fn with_dialer(config: ServerConfig, dialer: Arc<dyn Dialer>) -> Self {
        let address = config.address();
        Self {
            config,
            address,
            dialer,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The configured adb path, or the first executable found by
    /// [`find_adb`].
    pub fn adb_path(&self) -> Result<PathBuf> {
        match &self.config.adb_path {
            Some(path) => {
                is_executable(path)?;
                Ok(path.clone())
            }
            None => find_adb(),
        }
    }
}

impl std::fmt::Debug for AdbServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbServer")
            .field("address", &self.address)
            .field("adb_path", &self.config.adb_path)
            .finish()
    }
}

#[async_trait]
impl Server for AdbServer {
    async fn dial(&self) -> Result<Conn> {
        self.dialer.dial(&self.address).await
    }

    async fn start(&self) -> Result<()> {
        let adb = self.adb_path()?;
        let port = format!("tcp:{}", self.config.port);
        tracing::info!("starting adb server: {} -L {} start-server", adb.display(), port);

        let output = Command::new(&adb)
            .args(["-L", &port, "start-server"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::with_source(
                    ErrorKind::ServerNotAvailable,
                    format!("error starting server: {}", adb.display()),
                    e,
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::new(
                ErrorKind::ServerNotAvailable,
                format!(
                    "error starting server ({}): {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(())
    }
}

/// Dials `server`, sends `request` and returns its single reply message.
/// The connection is closed on every path.
pub async fn round_trip_single_response(server: &dyn Server, request: &str) -> Result<Vec<u8>> {
    let mut conn = server.dial().await?;
    tracing::debug!("request {}", request);
    let result = conn.round_trip_single_response(request.as_bytes()).await;
    close_conn(&mut conn).await;
    result
}

/// Closes `conn`, logging rather than returning a close failure.
pub(crate) async fn close_conn(conn: &mut Conn) {
    if let Err(e) = conn.close().await {
        tracing::warn!("error closing connection: {}", e);
    }
}

/// Locates the adb executable.
///
/// Searches `PATH`, then `$ANDROID_HOME/platform-tools`, then the default SDK
/// locations under the home directory.
pub fn find_adb() -> Result<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = std::env::var_os("PATH") {
        candidates.extend(std::env::split_paths(&path).map(|dir| dir.join(ADB_EXECUTABLE)));
    }
    if let Some(sdk) = std::env::var_os("ANDROID_HOME") {
        candidates.push(PathBuf::from(sdk).join("platform-tools").join(ADB_EXECUTABLE));
    }
    if let Some(home) = dirs::home_dir() {
        for sdk in ["Android/Sdk", "Library/Android/sdk", "AppData/Local/Android/Sdk"] {
            candidates.push(home.join(sdk).join("platform-tools").join(ADB_EXECUTABLE));
        }
    }

    candidates
        .into_iter()
        .find(|path| is_executable(path).is_ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::ServerNotAvailable,
                format!("could not find {ADB_EXECUTABLE} on PATH or in the Android SDK"),
            )
        })
}

/// Checks that `path` is a regular file we are allowed to execute.
pub fn is_executable(path: &Path) -> Result<()> {
    let not_executable = |why: &str| {
        Error::new(
            ErrorKind::ServerNotAvailable,
            format!("{} is not executable: {why}", path.display()),
        )
    };

    let meta = std::fs::metadata(path).map_err(|e| {
        Error::with_source(
            ErrorKind::ServerNotAvailable,
            format!("{} is not executable", path.display()),
            e,
        )
    })?;
    if !meta.is_file() {
        return Err(not_executable("not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(not_executable("no execute permission"));
        }
    }

    Ok(())
}
