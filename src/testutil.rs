//! Scripted streams and servers for unit tests.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::server::Server;
use crate::transport::Transport;
use crate::wire::Conn;

/// Shared view of what a [`MockStream`] saw.
#[derive(Clone, Default)]
pub(crate) struct MockHandle {
    written: Arc<Mutex<Vec<u8>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockHandle {
    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// In-memory stream that replays `input` and records writes.
pub(crate) struct MockStream {
    input: Vec<u8>,
    pos: usize,
    read_chunk: Option<usize>,
    fail_reads: bool,
    fail_writes: bool,
    fail_shutdown: bool,
    pending_after_input: bool,
    handle: MockHandle,
}

impl MockStream {
    pub(crate) fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            pos: 0,
            read_chunk: None,
            fail_reads: false,
            fail_writes: false,
            fail_shutdown: false,
            pending_after_input: false,
            handle: MockHandle::default(),
        }
    }

    /// Caps every read at `n` bytes.
    pub(crate) fn with_read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = Some(n);
        self
    }

    pub(crate) fn with_failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn with_failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    /// Never reports EOF: once `input` is consumed reads stay pending.
    pub(crate) fn pending_after_input(mut self) -> Self {
        self.pending_after_input = true;
        self
    }

    pub(crate) fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.fail_reads {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "mock read failure",
            )));
        }
        let remaining = this.input.len() - this.pos;
        if remaining == 0 {
            if this.pending_after_input {
                return Poll::Pending;
            }
            return Poll::Ready(Ok(()));
        }
        let mut n = remaining.min(buf.remaining());
        if let Some(chunk) = this.read_chunk {
            n = n.min(chunk);
        }
        buf.put_slice(&this.input[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        self.handle.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.handle.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Poll::Ready(Err(io::Error::other("mock shutdown failure")));
        }
        Poll::Ready(Ok(()))
    }
}

/// Transport over a fresh [`MockStream`] replaying `input`.
pub(crate) fn mock_transport(input: impl Into<Vec<u8>>) -> (Transport, MockHandle) {
    let mock = MockStream::new(input);
    let handle = mock.handle();
    (Transport::new(mock, "mock"), handle)
}

/// Host-protocol frame: 4 hex digits of length then the payload.
pub(crate) fn host_frame(payload: &str) -> String {
    format!("{:04x}{}", payload.len(), payload)
}

/// Sync-protocol string: little-endian u32 length then the bytes.
pub(crate) fn sync_string(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

/// [`Server`] that hands out scripted streams and counts restarts.
pub(crate) struct MockServer {
    dials: Mutex<VecDeque<Result<MockStream>>>,
    start_error: Option<Error>,
    starts: AtomicUsize,
    handles: Mutex<Vec<MockHandle>>,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        Self {
            dials: Mutex::new(VecDeque::new()),
            start_error: None,
            starts: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_stream(self, stream: MockStream) -> Self {
        self.dials.lock().unwrap().push_back(Ok(stream));
        self
    }

    pub(crate) fn with_dial_error(self, err: Error) -> Self {
        self.dials.lock().unwrap().push_back(Err(err));
        self
    }

    pub(crate) fn with_start_error(mut self, err: Error) -> Self {
        self.start_error = Some(err);
        self
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Handles of every stream dialed so far, in dial order.
    pub(crate) fn handles(&self) -> Vec<MockHandle> {
        self.handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Server for MockServer {
    async fn dial(&self) -> Result<Conn> {
        let next = self.dials.lock().unwrap().pop_front();
        match next {
            Some(Ok(stream)) => {
                self.handles.lock().unwrap().push(stream.handle());
                Ok(Conn::new(Transport::new(stream, "mock")))
            }
            Some(Err(err)) => Err(err),
            None => Err(Error::new(
                ErrorKind::ServerNotAvailable,
                "mock server has no more connections",
            )),
        }
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.start_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
