//! Background receive sessions.
//!
//! A session is one dedicated thread running either the terminator loop or
//! the pattern loop. Sessions are stopped cooperatively: `stop` clears the
//! active flag and the loop notices between two reads. Each session also
//! carries a generation number so a loop that outlives a stop/start pair
//! cannot keep delivering next to its successor. A new session waits on the
//! session lock until the previous loop has exited.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use super::config::StaleBufferPolicy;
use super::framing::{Framing, MessageBuffer, MessagePattern};
use super::manager::Shared;
use super::reader;
use super::state::ReceiveState;
use super::transport::Readiness;
use crate::error::NetworkError;
use crate::logging::targets;

pub(crate) struct ReceiveControl {
    active: AtomicBool,
    generation: AtomicU64,
    session: Mutex<()>,
    state: Mutex<ReceiveState>,
}

impl ReceiveControl {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            session: Mutex::new(()),
            state: Mutex::new(ReceiveState::Idle),
        }
    }

    pub(crate) fn state(&self) -> ReceiveState {
        *self.state.lock()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Start a session unless one is already active.
///
/// Returns `false` only when there is no stream or the thread could not be
/// spawned.
pub(crate) fn start(shared: &Arc<Shared>, framing: Framing) -> bool {
    let control = &shared.receiver;
    if control.is_active() {
        return true;
    }
    if !shared.transport.is_open() {
        return false;
    }
    if control.active.swap(true, Ordering::SeqCst) {
        return true;
    }

    let generation = control.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let session_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("linewire-receive".to_string())
        .spawn(move || run_session(session_shared, framing, generation));

    match spawned {
        Ok(_) => true,
        Err(err) => {
            control.active.store(false, Ordering::SeqCst);
            shared.report(NetworkError::Spawn(err.to_string()));
            false
        }
    }
}

/// Ask the running session to stop.
///
/// Unless `force` is set, waits up to `stop_timeout` for the loop to exit.
pub(crate) fn stop(shared: &Shared, force: bool) {
    let control = &shared.receiver;
    control.active.store(false, Ordering::SeqCst);
    if force {
        return;
    }

    if control
        .session
        .try_lock_for(shared.config.stop_timeout)
        .is_none()
    {
        tracing::warn!(
            target: targets::RECEIVE,
            timeout = ?shared.config.stop_timeout,
            "receive loop did not exit in time"
        );
    }
}

fn run_session(shared: Arc<Shared>, framing: Framing, generation: u64) {
    let control = &shared.receiver;
    let _session = control.session.lock();
    if !control.is_current(generation) {
        return;
    }

    *control.state.lock() = ReceiveState::Receiving;
    tracing::debug!(target: targets::RECEIVE, generation, ?framing, "receive session started");
    shared.events.receive_state.emit(true);

    match &framing {
        Framing::Terminator(terminator) => terminator_loop(&shared, *terminator, generation),
        Framing::Pattern(pattern) => pattern_loop(&shared, pattern, generation),
    }

    if control.generation.load(Ordering::SeqCst) == generation {
        control.active.store(false, Ordering::SeqCst);
    }
    *control.state.lock() = ReceiveState::Idle;
    tracing::debug!(target: targets::RECEIVE, generation, "receive session ended");
    shared.events.receive_state.emit(false);
}

fn terminator_loop(shared: &Shared, terminator: char, generation: u64) {
    let mut encoded = [0u8; 4];
    let terminator = terminator.encode_utf8(&mut encoded).as_bytes();
    let config = &shared.config;

    while shared.receiver.is_current(generation) {
        let _read = shared.transport.lock_read();
        let Some(stream) = shared.transport.current() else {
            end_with_error(shared, generation, NetworkError::NotConnected);
            return;
        };

        let mut source: &TcpStream = &stream;
        match reader::read_until_terminator(
            &mut source,
            terminator,
            config.read_buffer_size,
            config.read_timeout,
        ) {
            Ok(bytes) if !bytes.is_empty() => {
                tracing::trace!(target: targets::RECEIVE, len = bytes.len(), "frame received");
                shared
                    .events
                    .data_received
                    .emit(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(_) => {
                if let Err(err) = check_peer(shared, &stream) {
                    end_with_error(shared, generation, err);
                    return;
                }
            }
            Err(err) => {
                end_with_error(shared, generation, err.into());
                return;
            }
        }
    }
}

fn pattern_loop(shared: &Shared, pattern: &MessagePattern, generation: u64) {
    let config = &shared.config;
    let mut pending = MessageBuffer::default();
    let mut last_match = Instant::now();

    while shared.receiver.is_current(generation) {
        let _read = shared.transport.lock_read();
        let Some(stream) = shared.transport.current() else {
            end_with_error(shared, generation, NetworkError::NotConnected);
            return;
        };

        let mut source: &TcpStream = &stream;
        match reader::read_available(&mut source, config.read_buffer_size) {
            Ok(bytes) if !bytes.is_empty() => {
                pending.push(&bytes);
                for message in pending.extract(pattern) {
                    shared
                        .events
                        .message_received
                        .emit((message, pattern.as_str().to_string()));
                    last_match = Instant::now();
                }
            }
            Ok(_) => {
                if let Err(err) = check_peer(shared, &stream) {
                    end_with_error(shared, generation, err);
                    return;
                }
            }
            Err(err) => {
                end_with_error(shared, generation, err.into());
                return;
            }
        }

        if let StaleBufferPolicy::Discard(window) = config.stale_buffer
            && last_match.elapsed() > window
        {
            if !pending.is_empty() {
                tracing::trace!(
                    target: targets::RECEIVE,
                    discarded = pending.len(),
                    "dropping stale partial message"
                );
                pending.clear();
            }
            last_match = Instant::now();
        }
    }
}

/// Probe after an empty read: "no data yet" is fine, "peer gone" is not.
fn check_peer(shared: &Shared, stream: &TcpStream) -> Result<(), NetworkError> {
    match shared.transport.probe(stream)? {
        Readiness::Closed => Err(NetworkError::PeerDisconnected),
        Readiness::Idle | Readiness::Readable => Ok(()),
    }
}

/// Report a loop fault, unless the session was already stopped.
///
/// Called with the read lock held, so the faulted stream is dropped and the
/// error and disconnect are queued before any later connect can install a
/// new stream.
fn end_with_error(shared: &Shared, generation: u64, err: NetworkError) {
    if shared.receiver.is_current(generation) {
        shared.drop_stream_locked();
        shared.fail(err);
    } else {
        tracing::debug!(target: targets::RECEIVE, %err, "receive loop ended after stop");
    }
}
