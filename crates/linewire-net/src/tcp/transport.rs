//! The swappable stream handle.
//!
//! The current stream lives behind an `RwLock<Option<Arc<TcpStream>>>` and is
//! replaced wholesale on connect and close. Readers hold `read_lock` for the
//! whole of a framed read and load the handle once under it; writers do the
//! same with `write_lock`. Replacing the handle takes `read_lock`, so no read
//! is ever in flight on a handle that has just been swapped out.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use super::config::SocketConfig;
use crate::error::{NetworkError, Result};

/// Outcome of a peer-disconnect probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Nothing to read, peer still there.
    Idle,
    /// Bytes are waiting.
    Readable,
    /// The peer closed or reset the connection.
    Closed,
}

pub(crate) struct Transport {
    stream: RwLock<Option<Arc<TcpStream>>>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl Transport {
    pub(crate) fn new() -> Self {
        Self {
            stream: RwLock::new(None),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// The current stream, if any.
    pub(crate) fn current(&self) -> Option<Arc<TcpStream>> {
        self.stream.read().clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.read().is_some()
    }

    /// Serialize against other readers and handle replacement.
    pub(crate) fn lock_read(&self) -> MutexGuard<'_, ()> {
        self.read_lock.lock()
    }

    /// Swap in `stream`, returning the previous handle.
    ///
    /// Callers hold the read lock.
    pub(crate) fn replace(&self, stream: Option<TcpStream>) -> Option<Arc<TcpStream>> {
        std::mem::replace(&mut *self.stream.write(), stream.map(Arc::new))
    }

    /// Shut down the current stream without releasing the handle.
    ///
    /// Unblocks any read in flight on it.
    pub(crate) fn shutdown_current(&self) {
        if let Some(stream) = self.current() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Write all of `bytes` to the current stream.
    pub(crate) fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let _write = self.write_lock.lock();
        let stream = self.current().ok_or(NetworkError::NotConnected)?;
        let mut writer: &TcpStream = &stream;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Check, without consuming anything, whether the peer is still there.
    ///
    /// The stream is briefly switched to non-blocking mode under the write
    /// lock so no concurrent write observes the mode change.
    pub(crate) fn probe(&self, stream: &TcpStream) -> io::Result<Readiness> {
        let _write = self.write_lock.lock();
        stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let peeked = stream.peek(&mut byte);
        stream.set_nonblocking(false)?;

        match peeked {
            Ok(0) => Ok(Readiness::Closed),
            Ok(_) => Ok(Readiness::Readable),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Readiness::Idle),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::NotConnected
                ) =>
            {
                Ok(Readiness::Closed)
            }
            Err(err) => Err(err),
        }
    }
}

/// Apply `config` to a freshly connected or accepted stream.
pub(crate) fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(config.no_delay)?;
    stream.set_read_timeout(Some(config.socket_read_timeout()))?;
    stream.set_write_timeout(config.write_timeout.filter(|timeout| !timeout.is_zero()))?;
    Ok(())
}
