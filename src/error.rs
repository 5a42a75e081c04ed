//! Error taxonomy shared by every layer of the client.
//!
//! Each [`Error`] carries an [`ErrorKind`]. Wrapping an error with
//! [`Error::wrap`] adds context but keeps the kind, so callers can always ask
//! [`has_kind`] after any amount of wrapping.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Alias for `Result<T, adb_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

type Source = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied invalid input (e.g. an empty command).
    AssertionError,
    /// Malformed textual or numeric data.
    ParseError,
    /// The initial transport to the server could not be established.
    ServerNotAvailable,
    /// I/O failure on a live transport.
    NetworkError,
    /// The remote closed or truncated the stream mid-frame.
    ConnectionResetError,
    /// The remote explicitly reported `FAIL` with a message.
    AdbError,
    /// A device lookup missed, or the server said so in a `FAIL` message.
    DeviceNotFound,
    /// A sync `STAT` returned the all-zero "does not exist" tuple.
    FileNoExistError,
    /// A caller-specified deadline elapsed.
    CommandTimeout,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::ServerNotAvailable => "ServerNotAvailable",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::ConnectionResetError => "ConnectionResetError",
            ErrorKind::AdbError => "AdbError",
            ErrorKind::DeviceNotFound => "DeviceNotFound",
            ErrorKind::FileNoExistError => "FileNoExistError",
            ErrorKind::CommandTimeout => "CommandTimeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from the host protocol, the sync protocol, or the watcher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    server_message: Option<String>,
    #[source]
    source: Option<Source>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            server_message: None,
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            server_message: None,
            source: Some(Arc::new(source)),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Wraps an I/O failure.
    ///
    /// `UnexpectedEof` means the remote hung up mid-frame and becomes
    /// [`ErrorKind::ConnectionResetError`]; everything else is a
    /// [`ErrorKind::NetworkError`].
    pub fn io(message: impl Into<String>, err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::UnexpectedEof {
            ErrorKind::ConnectionResetError
        } else {
            ErrorKind::NetworkError
        };
        Self::with_source(kind, message, err)
    }

    /// A short read: the stream ended after `actual` of `expected` bytes.
    pub fn incomplete(what: &str, actual: usize, expected: usize) -> Self {
        Self::new(
            ErrorKind::ConnectionResetError,
            format!("incomplete {what}: read {actual} bytes, expecting {expected}"),
        )
    }

    /// Builds the error for a `FAIL` reply carrying `message`.
    ///
    /// The kind comes from [`classify_server_message`].
    pub fn server(request: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let text = if request.is_empty() {
            format!("server error: {message}")
        } else {
            format!("server error for {request} request: {message}")
        };
        Self {
            kind: classify_server_message(&message),
            message: text,
            server_message: Some(message),
            source: None,
        }
    }

    /// Adds context while keeping this error's kind.
    #[must_use]
    pub fn wrap(self, context: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{context}: {}", self.message),
            server_message: self.server_message.clone(),
            source: Some(Arc::new(self)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The raw text the server sent after `FAIL`, if this error came from one.
    pub fn server_message(&self) -> Option<&str> {
        self.server_message.as_deref()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Maps the free text of a server `FAIL` reply onto an [`ErrorKind`].
///
/// Substring matching against the server's wording is the only signal the
/// protocol offers. Keep every such heuristic in this function.
pub fn classify_server_message(message: &str) -> ErrorKind {
    if message.contains("device not found") || is_device_serial_not_found(message) {
        ErrorKind::DeviceNotFound
    } else {
        ErrorKind::AdbError
    }
}

/// Matches `device '<serial>' not found`.
fn is_device_serial_not_found(message: &str) -> bool {
    let Some(start) = message.find("device '") else {
        return false;
    };
    message[start + "device '".len()..].contains("' not found")
}

/// Returns true if `err`, or any error in its source chain, is an [`Error`]
/// of the given kind.
pub fn has_kind(err: &(dyn std::error::Error + 'static), kind: ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(adb) = e.downcast_ref::<Error>() {
            return adb.kind == kind;
        }
        // Shared sources surface as the Arc itself; step inside it.
        if let Some(shared) = e.downcast_ref::<Source>() {
            current = Some(&**shared as &(dyn std::error::Error + 'static));
            continue;
        }
        // io::Error::source skips a custom payload, so look at it directly.
        if let Some(inner) = e.downcast_ref::<io::Error>().and_then(|io| io.get_ref()) {
            current = Some(inner as &(dyn std::error::Error + 'static));
            continue;
        }
        current = e.source();
    }
    false
}

/// Returns true if `err` is a plain [`ErrorKind::AdbError`] whose server text
/// satisfies `predicate`. Reclassified errors such as `DeviceNotFound` never
/// match.
pub fn is_server_error_matching(err: &Error, predicate: impl FnOnce(&str) -> bool) -> bool {
    err.kind == ErrorKind::AdbError && err.server_message().is_some_and(predicate)
}
