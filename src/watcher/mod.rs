//! Device watcher: turns the `host:track-devices` stream into state-change
//! events.
//!
//! One background task owns the tracking connection and the sending half of
//! the event channel. It runs until shut down:
//!
//! ```text
//! Idle -> Connecting -> Streaming -+-> Failed -> (restart server, back off) -> Connecting
//!                                  +-> ShuttingDown -> Terminated
//! ```
//!
//! Failures never reach the event channel. They are recorded and exposed
//! through [`DeviceWatcher::err`] while the task reconnects.

pub mod roster;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::server::{close_conn, Server};
use crate::wire::Conn;

pub use roster::{calculate_state_diffs, parse_device_states, DeviceStateChangedEvent, Roster};

const TRACK_DEVICES_REQUEST: &str = "host:track-devices";

/// Subscription to device state changes.
///
/// Dropping the watcher stops the background task; [`shutdown`](Self::shutdown)
/// additionally waits for it to finish.
pub struct DeviceWatcher {
    events: mpsc::Receiver<DeviceStateChangedEvent>,
    last_error: Arc<Mutex<Option<Error>>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Starts watching. Must be called from within a tokio runtime.
    pub fn new(server: Arc<dyn Server>, config: WatcherConfig) -> Self {
        let (tx, events) = mpsc::channel(config.channel_capacity.max(1));
        let last_error = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(watch_loop(
            server,
            tx,
            last_error.clone(),
            shutdown.clone(),
            config,
        ));

        Self {
            events,
            last_error,
            shutdown,
            task: Some(task),
        }
    }

    /// Next event, or `None` once the watcher has shut down.
    pub async fn recv(&mut self) -> Option<DeviceStateChangedEvent> {
        self.events.recv().await
    }

    /// The raw event channel.
    pub fn events(&mut self) -> &mut mpsc::Receiver<DeviceStateChangedEvent> {
        &mut self.events
    }

    /// The most recent failure the watcher recovered from, if any.
    pub fn err(&self) -> Option<Error> {
        lock(&self.last_error).clone()
    }

    /// Stops the watcher and waits for the background task to exit.
    ///
    /// Idempotent. When this returns the event channel is closed: buffered
    /// events can still be drained, then [`recv`](Self::recv) yields `None`.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("device watcher task failed: {}", e);
            }
        }
        self.events.close();
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for DeviceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWatcher")
            .field("running", &self.task.is_some())
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

fn lock(slot: &Mutex<Option<Error>>) -> std::sync::MutexGuard<'_, Option<Error>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record_error(slot: &Mutex<Option<Error>>, err: Error) {
    tracing::warn!("device watcher: {}", err);
    *lock(slot) = Some(err);
}

async fn watch_loop(
    server: Arc<dyn Server>,
    tx: mpsc::Sender<DeviceStateChangedEvent>,
    last_error: Arc<Mutex<Option<Error>>>,
    shutdown: CancellationToken,
    config: WatcherConfig,
) {
    // Carried across reconnects so a reconnect alone produces no events.
    let mut last_known = Roster::new();
    let mut backoff = config.initial_backoff();

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = connect_to_track_devices(server.as_ref()) => res,
        };

        match connected {
            Ok(conn) => {
                tracing::debug!("tracking devices");
                backoff = config.initial_backoff();
                let (finished, err) =
                    publish_devices_until_error(conn, &tx, &shutdown, &mut last_known).await;
                if finished {
                    break;
                }
                if let Some(err) = err {
                    record_error(&last_error, err);
                }
            }
            Err(err) => record_error(&last_error, err),
        }

        // The server probably died; bring it back before reconnecting.
        let started = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = server.start() => res,
        };
        if let Err(err) = started {
            record_error(&last_error, err.wrap("error restarting server"));
        }

        if wait_backoff(backoff, &shutdown).await {
            break;
        }
        backoff = (backoff * 2).min(config.max_backoff());
    }

    tracing::debug!("device watcher stopped");
}

/// Returns true if shutdown was requested while waiting.
async fn wait_backoff(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Dials the server and requests the device tracking stream.
pub async fn connect_to_track_devices(server: &dyn Server) -> Result<Conn> {
    let mut conn = server.dial().await?;

    let requested = async {
        conn.send_message_string(TRACK_DEVICES_REQUEST).await?;
        conn.read_status(TRACK_DEVICES_REQUEST).await
    }
    .await;

    match requested {
        Ok(()) => Ok(conn),
        Err(e) => {
            close_conn(&mut conn).await;
            Err(e)
        }
    }
}

/// Publishes roster changes from `conn` until it fails or shutdown is
/// requested. `conn` is closed before returning.
///
/// Returns `(finished, err)`: `finished` is true when the watcher should stop
/// (shutdown requested or nobody is listening), in which case `err` is
/// `None`. Otherwise `err` describes why the stream ended.
pub async fn publish_devices_until_error(
    mut conn: Conn,
    tx: &mpsc::Sender<DeviceStateChangedEvent>,
    shutdown: &CancellationToken,
    last_known: &mut Roster,
) -> (bool, Option<Error>) {
    let outcome = publish_loop(&mut conn, tx, shutdown, last_known).await;
    close_conn(&mut conn).await;
    outcome
}

async fn publish_loop(
    conn: &mut Conn,
    tx: &mpsc::Sender<DeviceStateChangedEvent>,
    shutdown: &CancellationToken,
    last_known: &mut Roster,
) -> (bool, Option<Error>) {
    loop {
        if shutdown.is_cancelled() {
            return (true, None);
        }

        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return (true, None),
            msg = conn.read_message() => msg,
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => return (false, Some(e)),
        };

        let states = match parse_device_states(&String::from_utf8_lossy(&msg)) {
            Ok(states) => states,
            Err(e) => return (false, Some(e)),
        };

        for event in calculate_state_diffs(last_known, &states) {
            tracing::debug!(
                "device {} changed state: {} -> {}",
                event.serial,
                event.old_state,
                event.new_state
            );
            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return (true, None),
                res = tx.send(event) => res,
            };
            if sent.is_err() {
                // Receiver is gone; nobody to publish to.
                return (true, None);
            }
        }

        *last_known = states;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_state::DeviceState;
    use crate::error::{has_kind, ErrorKind};
    use crate::testutil::{host_frame, MockServer, MockStream};
    use crate::transport::Transport;
    use std::collections::HashSet;

    fn event(serial: &str, old: DeviceState, new: DeviceState) -> DeviceStateChangedEvent {
        DeviceStateChangedEvent {
            serial: serial.to_string(),
            old_state: old,
            new_state: new,
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            channel_capacity: 16,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<DeviceStateChangedEvent>) -> HashSet<DeviceStateChangedEvent> {
        let mut out = HashSet::new();
        while let Ok(event) = rx.try_recv() {
            out.insert(event);
        }
        out
    }

    #[tokio::test]
    async fn test_publish_then_connection_reset() {
        let stream = MockStream::new(host_frame("1\toffline\n2\tdevice\n"));
        let conn = Conn::new(Transport::new(stream, "mock"));
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let mut last_known = Roster::new();

        let (finished, err) =
            publish_devices_until_error(conn, &tx, &shutdown, &mut last_known).await;

        assert!(!finished);
        let err = err.unwrap();
        assert!(has_kind(&err, ErrorKind::ConnectionResetError));
        assert_eq!(
            drain(&mut rx),
            HashSet::from([
                event("1", DeviceState::Disconnected, DeviceState::Offline),
                event("2", DeviceState::Disconnected, DeviceState::Online),
            ])
        );
        assert_eq!(last_known.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_already_cancelled() {
        let stream = MockStream::new(host_frame("1\tdevice\n"));
        let handle = stream.handle();
        let conn = Conn::new(Transport::new(stream, "mock"));
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut last_known = Roster::new();

        let (finished, err) =
            publish_devices_until_error(conn, &tx, &shutdown, &mut last_known).await;

        assert!(finished);
        assert!(err.is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_publish_diffs_successive_rosters() {
        let input = format!(
            "{}{}{}",
            host_frame("1\tdevice\n"),
            host_frame("1\tdevice\n2\toffline\n"),
            host_frame("2\tdevice\n"),
        );
        let conn = Conn::new(Transport::new(MockStream::new(input), "mock"));
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let mut last_known = Roster::new();

        let (finished, _) =
            publish_devices_until_error(conn, &tx, &shutdown, &mut last_known).await;
        assert!(!finished);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events[0], event("1", DeviceState::Disconnected, DeviceState::Online));
        assert_eq!(events[1], event("2", DeviceState::Disconnected, DeviceState::Offline));
        assert_eq!(
            events[2..].iter().cloned().collect::<HashSet<_>>(),
            HashSet::from([
                event("1", DeviceState::Online, DeviceState::Disconnected),
                event("2", DeviceState::Offline, DeviceState::Online),
            ])
        );
    }

    #[tokio::test]
    async fn test_publish_malformed_roster_is_fatal() {
        let input = host_frame("1\tdevice\nbroken line\n");
        let conn = Conn::new(Transport::new(MockStream::new(input), "mock"));
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let mut last_known = Roster::new();

        let (finished, err) =
            publish_devices_until_error(conn, &tx, &shutdown, &mut last_known).await;

        assert!(!finished);
        assert_eq!(err.unwrap().kind(), ErrorKind::ParseError);
        assert!(rx.try_recv().is_err());
        assert!(last_known.is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_track_devices() {
        let stream = MockStream::new("OKAY");
        let server = MockServer::new().with_stream(stream);

        connect_to_track_devices(&server).await.unwrap();
        assert_eq!(server.handles()[0].written_string(), "0012host:track-devices");
    }

    #[tokio::test]
    async fn test_connect_to_track_devices_failure_closes() {
        let stream = MockStream::new(format!("FAIL{}", host_frame("nope")));
        let server = MockServer::new().with_stream(stream);

        let err = connect_to_track_devices(&server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdbError);
        assert_eq!(server.handles()[0].shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_watcher_reconnects_and_carries_roster() {
        // First stream: one device appears then the server drops us.
        let first = MockStream::new(format!("OKAY{}", host_frame("1\tdevice\n")));
        // Second stream: same device still there plus a new one; stays open.
        let second = MockStream::new(format!(
            "OKAY{}",
            host_frame("1\tdevice\n2\toffline\n")
        ))
        .pending_after_input();
        let server = Arc::new(MockServer::new().with_stream(first).with_stream(second));

        let mut watcher = DeviceWatcher::new(server.clone(), fast_config());

        assert_eq!(
            watcher.recv().await.unwrap(),
            event("1", DeviceState::Disconnected, DeviceState::Online)
        );
        assert_eq!(
            watcher.recv().await.unwrap(),
            event("2", DeviceState::Disconnected, DeviceState::Offline)
        );

        let err = watcher.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConnectionResetError);
        assert_eq!(server.starts(), 1);

        watcher.shutdown().await;
        assert!(watcher.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watcher_survives_restart_failure() {
        let stream = MockStream::new(format!("OKAY{}", host_frame("9\tdevice\n")))
            .pending_after_input();
        let server = Arc::new(
            MockServer::new()
                .with_dial_error(Error::new(ErrorKind::ServerNotAvailable, "refused"))
                .with_stream(stream)
                .with_start_error(Error::new(ErrorKind::ServerNotAvailable, "no adb")),
        );

        let mut watcher = DeviceWatcher::new(server.clone(), fast_config());

        assert_eq!(
            watcher.recv().await.unwrap(),
            event("9", DeviceState::Disconnected, DeviceState::Online)
        );
        let err = watcher.err().unwrap();
        assert!(err.to_string().contains("error restarting server"));
        assert_eq!(server.starts(), 1);

        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_closes_channel() {
        let stream = MockStream::new("OKAY").pending_after_input();
        let server = Arc::new(MockServer::new().with_stream(stream));

        let mut watcher = DeviceWatcher::new(server.clone(), fast_config());
        watcher.shutdown().await;
        watcher.shutdown().await;

        assert!(watcher.recv().await.is_none());
        assert!(watcher.err().is_none());
        assert_eq!(server.starts(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let server = Arc::new(MockServer::new());
        let config = WatcherConfig {
            channel_capacity: 4,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };

        let mut watcher = DeviceWatcher::new(server.clone(), config);
        // Wait until the first failure has been recorded.
        while watcher.err().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), watcher.shutdown())
            .await
            .unwrap();
        assert!(watcher.recv().await.is_none());
    }
}
