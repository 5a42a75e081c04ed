//! Opening connections to the adb server.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::wire::Conn;

/// Creates host-protocol connections to an adb server.
///
/// Injected into [`AdbServer`](crate::server::AdbServer) so tests and
/// embedders can supply their own transport.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Conn>;
}

/// Plain TCP, the way the adb server is normally reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str) -> Result<Conn> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            Error::with_source(
                ErrorKind::ServerNotAvailable,
                format!("error dialing {address}"),
                e,
            )
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("could not set TCP_NODELAY on {}: {}", address, e);
        }
        tracing::debug!("dialed adb server at {}", address);
        Ok(Conn::new(Transport::new(stream, address)))
    }
}
