//! The accept loop.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use linewire_core::GroupedTaskQueue;
use parking_lot::Mutex;

use super::manager::{Shared, SocketManager};
use super::state::ListenState;
use crate::error::{NetworkError, Result};
use crate::logging::targets;

pub(crate) struct ListenControl {
    active: AtomicBool,
    generation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    state: Mutex<ListenState>,
}

impl ListenControl {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            worker: Mutex::new(None),
            local_addr: Mutex::new(None),
            state: Mutex::new(ListenState::NotListening),
        }
    }

    pub(crate) fn state(&self) -> ListenState {
        *self.state.lock()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Flip the flag; the loop exits within one accept poll interval.
    pub(crate) fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Bind `addr` and run a fresh accept loop, replacing any previous one.
pub(crate) fn start(shared: &Arc<Shared>, addr: SocketAddr) -> Result<()> {
    let control = &shared.listener;
    let mut worker = control.worker.lock();

    // The old listener must be gone before the address is bound again.
    control.stop();
    if let Some(previous) = worker.take()
        && previous.thread().id() != thread::current().id()
    {
        let _ = previous.join();
    }

    let listener = TcpListener::bind(addr)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|err| NetworkError::Listen(format!("{addr}: {err}")))?;
    let bound = listener.local_addr().ok();
    *control.local_addr.lock() = bound;

    let generation = control.generation.fetch_add(1, Ordering::SeqCst) + 1;
    control.active.store(true, Ordering::SeqCst);

    let loop_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name("linewire-accept".to_string())
        .spawn(move || accept_loop(loop_shared, listener, generation))
        .map_err(|err| {
            control.active.store(false, Ordering::SeqCst);
            NetworkError::Spawn(err.to_string())
        })?;
    *worker = Some(handle);

    tracing::debug!(target: targets::LISTENER, addr = ?bound, "listener bound");
    Ok(())
}

fn accept_loop(shared: Arc<Shared>, listener: TcpListener, generation: u64) {
    let control = &shared.listener;
    *control.state.lock() = ListenState::Listening;
    shared.events.listen_state.emit(true);

    let outcome = loop {
        if !control.is_current(generation) {
            break Ok(());
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                accept_client(&shared, stream, peer);
                // Drain any backlog before sleeping.
                continue;
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) => {}
            Err(err) => break Err(NetworkError::Listen(err.to_string())),
        }

        thread::sleep(shared.config.accept_poll_interval);
    };

    drop(listener);
    if control.generation.load(Ordering::SeqCst) == generation {
        control.active.store(false, Ordering::SeqCst);
        *control.local_addr.lock() = None;
    }
    *control.state.lock() = ListenState::NotListening;

    if let Err(err) = outcome {
        shared.report(err);
    }
    tracing::debug!(target: targets::LISTENER, generation, "accept loop exited");
    shared.events.listen_state.emit(false);
}

fn accept_client(shared: &Shared, stream: TcpStream, peer: SocketAddr) {
    // Each client gets its own ordering domains on the same pool.
    let dispatcher = GroupedTaskQueue::with_pool(Arc::clone(shared.dispatcher.pool()));

    match SocketManager::from_stream(stream, shared.config.clone(), dispatcher) {
        Ok(client) => {
            tracing::debug!(target: targets::LISTENER, %peer, "client accepted");
            shared.events.client_connected.emit(Arc::new(client));
        }
        Err(err) => {
            tracing::warn!(target: targets::LISTENER, %peer, %err, "failed to set up accepted client");
            shared.report(err);
        }
    }
}
