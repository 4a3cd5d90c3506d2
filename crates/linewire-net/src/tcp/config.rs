//! Configuration types for the socket manager.

use std::time::Duration;

/// What the pattern receive loop does with a partial message that never
/// completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleBufferPolicy {
    /// Discard the buffered bytes when no message matched within the window.
    Discard(Duration),
    /// Keep buffering until a message matches or the session ends.
    Keep,
}

impl Default for StaleBufferPolicy {
    fn default() -> Self {
        Self::Discard(Duration::from_millis(1000))
    }
}

/// Timeouts, intervals and buffer sizes used by a
/// [`SocketManager`](super::SocketManager).
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Bound on an outbound connect.
    pub connect_timeout: Duration,
    /// A framed read returns what it has once no byte arrived for this long.
    pub read_timeout: Duration,
    /// Write timeout. `None` means writes block until the OS accepts them.
    pub write_timeout: Option<Duration>,
    /// Longest single blocking wait on the socket. Bounds how quickly a
    /// receive loop notices a stop request between reads.
    pub poll_interval: Duration,
    /// Sleep between accept attempts in the listen loop.
    pub accept_poll_interval: Duration,
    /// Read chunk size in bytes.
    pub read_buffer_size: usize,
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Handling of unmatched bytes in pattern receive mode.
    pub stale_buffer: StaleBufferPolicy,
    /// How long a non-forced stop waits for the receive loop to exit.
    pub stop_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            write_timeout: Some(Duration::from_secs(3)),
            poll_interval: Duration::from_millis(5),
            accept_poll_interval: Duration::from_millis(10),
            read_buffer_size: 8192,
            no_delay: false,
            stale_buffer: StaleBufferPolicy::default(),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

impl SocketConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the framed read inactivity timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Let writes block without a timeout.
    pub fn no_write_timeout(mut self) -> Self {
        self.write_timeout = None;
        self
    }

    /// Set the socket poll interval. Clamped to at least one millisecond.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the sleep between accept attempts.
    pub fn accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    /// Set the read chunk size. Clamped to at least one byte.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the stale-buffer policy for pattern receive mode.
    pub fn stale_buffer(mut self, policy: StaleBufferPolicy) -> Self {
        self.stale_buffer = policy;
        self
    }

    /// Set how long a non-forced receive stop waits.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The socket-level read timeout. Never zero, which the OS rejects.
    pub(crate) fn socket_read_timeout(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }
}
