//! Error types for the networking module.

use std::io;
use std::time::Duration;

/// Network-specific errors.
///
/// Errors are `Clone` so they can be carried by the `error` signal to every
/// connected observer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The connection string is not `"<ipv4-address>:<port>"`.
    #[error("Invalid connection string: {0}")]
    InvalidAddress(String),
    /// No connection settings have been configured.
    #[error("No connection settings configured")]
    NoSettings,
    /// Connecting did not complete within the allowed time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    /// Connection refused or failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// There is no stream to operate on.
    #[error("Not connected")]
    NotConnected,
    /// The peer closed the connection.
    #[error("Client disconnect detected internally")]
    PeerDisconnected,
    /// Binding or accepting on the listen socket failed.
    #[error("Listen error: {0}")]
    Listen(String),
    /// A start or end message pattern is not a valid regular expression.
    #[error("Invalid message pattern: {0}")]
    InvalidPattern(String),
    /// A background worker thread could not be started.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
    /// I/O error on an established stream.
    #[error("I/O error: {0}")]
    Io(String),
}

impl NetworkError {
    /// Map a connect failure, keeping timeouts distinguishable.
    pub(crate) fn from_connect(err: io::Error, timeout: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout(timeout),
            _ => Self::Connection(err.to_string()),
        }
    }

    /// Whether the error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::PeerDisconnected | Self::NotConnected | Self::Io(_) | Self::Connection(_)
        )
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<regex::Error> for NetworkError {
    fn from(err: regex::Error) -> Self {
        Self::InvalidPattern(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
