//! Framed read primitives.
//!
//! All reads assume a stream whose blocking reads give up after a short
//! socket timeout (see `SocketConfig::poll_interval`), so an idle read
//! surfaces as `WouldBlock`/`TimedOut` instead of blocking forever.

use std::io::{self, Read};
use std::time::{Duration, Instant};

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Read chunks until `complete` accepts the accumulated bytes.
///
/// Returns early with whatever was read when no byte arrived for `timeout`
/// (the clock restarts on every successful read) or when the peer closed the
/// stream. An empty result therefore means "nothing arrived".
pub(crate) fn read_until<R, F>(
    reader: &mut R,
    chunk_size: usize,
    timeout: Duration,
    mut complete: F,
) -> io::Result<Vec<u8>>
where
    R: Read + ?Sized,
    F: FnMut(&[u8]) -> bool,
{
    let mut received = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut last_progress = Instant::now();

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(received),
            Ok(n) => {
                received.extend_from_slice(&chunk[..n]);
                if complete(&received) {
                    return Ok(received);
                }
                last_progress = Instant::now();
            }
            Err(err) if is_idle(&err) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }

        if last_progress.elapsed() >= timeout {
            return Ok(received);
        }
    }
}

/// Read until the accumulated bytes end with `terminator`.
pub(crate) fn read_until_terminator<R: Read + ?Sized>(
    reader: &mut R,
    terminator: &[u8],
    chunk_size: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    read_until(reader, chunk_size, timeout, |received| {
        received.ends_with(terminator)
    })
}

/// Read one byte at a time until the accumulated bytes end with `sequence`.
///
/// Nothing past the sequence is consumed from the stream.
pub(crate) fn read_until_sequence<R: Read + ?Sized>(
    reader: &mut R,
    sequence: &[u8],
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    read_until(reader, 1, timeout, |received| received.ends_with(sequence))
}

/// Wait up to `timeout` for the first chunk of data.
pub(crate) fn read_first_chunk<R: Read + ?Sized>(
    reader: &mut R,
    chunk_size: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    read_until(reader, chunk_size, timeout, |received| !received.is_empty())
}

/// One read of whatever is available right now.
pub(crate) fn read_available<R: Read + ?Sized>(
    reader: &mut R,
    chunk_size: usize,
) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut chunk) {
            Ok(n) => {
                chunk.truncate(n);
                return Ok(chunk);
            }
            Err(err) if is_idle(&err) => return Ok(Vec::new()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Read and drop everything currently available. Returns the byte count.
pub(crate) fn discard_available<R: Read + ?Sized>(
    reader: &mut R,
    chunk_size: usize,
) -> io::Result<usize> {
    let mut discarded = 0;
    loop {
        let chunk = read_available(reader, chunk_size)?;
        if chunk.is_empty() {
            return Ok(discarded);
        }
        discarded += chunk.len();
    }
}
