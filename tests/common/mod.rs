//! A scripted adb server on a loopback socket.

#![allow(dead_code)]

use adb_bridge::{Adb, Config, ServerConfig, WatcherConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Routes library logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Binds a listener and returns it with a client pointed at it.
///
/// The adb path points nowhere so a watcher restart can never launch a real
/// server.
pub async fn fake_adb() -> anyhow::Result<(TcpListener, Adb)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            adb_path: Some("/nonexistent/adb".into()),
        },
        watcher: WatcherConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            ..WatcherConfig::default()
        },
    };
    Ok((listener, Adb::new(config)))
}

pub async fn accept(listener: &TcpListener) -> anyhow::Result<TcpStream> {
    let (socket, _) = listener.accept().await?;
    Ok(socket)
}

/// Reads one `hex4 + payload` host request.
pub async fn read_request(socket: &mut TcpStream) -> anyhow::Result<String> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await?;
    let len = usize::from_str_radix(std::str::from_utf8(&header)?, 16)?;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await?;
    Ok(String::from_utf8(payload)?)
}

/// Reads a request and fails unless it is `expected`.
pub async fn expect_request(socket: &mut TcpStream, expected: &str) -> anyhow::Result<()> {
    let request = read_request(socket).await?;
    anyhow::ensure!(request == expected, "expected {expected:?}, got {request:?}");
    Ok(())
}

pub async fn write_okay(socket: &mut TcpStream) -> anyhow::Result<()> {
    socket.write_all(b"OKAY").await?;
    Ok(())
}

/// `OKAY` followed by one framed message.
pub async fn write_okay_message(socket: &mut TcpStream, msg: &str) -> anyhow::Result<()> {
    socket.write_all(b"OKAY").await?;
    write_frame(socket, msg).await
}

pub async fn write_fail(socket: &mut TcpStream, msg: &str) -> anyhow::Result<()> {
    socket.write_all(b"FAIL").await?;
    write_frame(socket, msg).await
}

pub async fn write_frame(socket: &mut TcpStream, msg: &str) -> anyhow::Result<()> {
    socket
        .write_all(format!("{:04x}{}", msg.len(), msg).as_bytes())
        .await?;
    Ok(())
}

/// Accepts `host:transport-any` followed by `sync:`.
pub async fn expect_sync_session(socket: &mut TcpStream) -> anyhow::Result<()> {
    expect_request(socket, "host:transport-any").await?;
    write_okay(socket).await?;
    expect_request(socket, "sync:").await?;
    write_okay(socket).await
}

pub async fn read_tag(socket: &mut TcpStream) -> anyhow::Result<String> {
    let mut tag = [0u8; 4];
    socket.read_exact(&mut tag).await?;
    Ok(String::from_utf8_lossy(&tag).into_owned())
}

pub async fn read_u32(socket: &mut TcpStream) -> anyhow::Result<u32> {
    Ok(socket.read_u32_le().await?)
}

pub async fn read_sync_bytes(socket: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let len = read_u32(socket).await? as usize;
    let mut data = vec![0u8; len];
    socket.read_exact(&mut data).await?;
    Ok(data)
}

/// Reads `<tag><len><path>` and returns `(tag, path)`.
pub async fn read_sync_request(socket: &mut TcpStream) -> anyhow::Result<(String, String)> {
    let tag = read_tag(socket).await?;
    let path = String::from_utf8(read_sync_bytes(socket).await?)?;
    Ok((tag, path))
}

pub async fn write_sync_stat(
    socket: &mut TcpStream,
    tag: &[u8; 4],
    mode: u32,
    size: u32,
    mtime: u32,
) -> anyhow::Result<()> {
    socket.write_all(tag).await?;
    socket.write_u32_le(mode).await?;
    socket.write_u32_le(size).await?;
    socket.write_u32_le(mtime).await?;
    Ok(())
}

pub async fn write_sync_data(
    socket: &mut TcpStream,
    tag: &[u8; 4],
    data: &[u8],
) -> anyhow::Result<()> {
    socket.write_all(tag).await?;
    socket.write_u32_le(data.len() as u32).await?;
    socket.write_all(data).await?;
    Ok(())
}

/// `<len><bytes>` with no tag, as in the name of a `DENT`.
pub async fn write_sync_string(socket: &mut TcpStream, s: &str) -> anyhow::Result<()> {
    socket.write_u32_le(s.len() as u32).await?;
    socket.write_all(s.as_bytes()).await?;
    Ok(())
}
