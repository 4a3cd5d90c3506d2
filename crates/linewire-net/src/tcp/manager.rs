//! The socket manager.

use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use linewire_core::GroupedTaskQueue;
use parking_lot::Mutex;

use super::config::SocketConfig;
use super::events::SocketEvents;
use super::framing::Framing;
use super::listener::{self, ListenControl};
use super::reader;
use super::receive::{self, ReceiveControl};
use super::state::{ConnectionState, ListenState, ReceiveState};
use super::transport::{Transport, configure_stream};
use crate::error::{NetworkError, Result};
use crate::logging::targets;
use crate::settings::ConnectionSettings;

/// State shared between the manager and its background loops.
pub(crate) struct Shared {
    pub(crate) config: SocketConfig,
    pub(crate) dispatcher: GroupedTaskQueue,
    pub(crate) events: SocketEvents,
    pub(crate) transport: Transport,
    pub(crate) receiver: ReceiveControl,
    pub(crate) listener: ListenControl,
    settings: Mutex<Option<ConnectionSettings>>,
    /// Serializes connect and close.
    client_lock: Mutex<()>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<NetworkError>>,
}

impl Shared {
    fn new(config: SocketConfig, dispatcher: GroupedTaskQueue) -> Self {
        Self {
            events: SocketEvents::new(&dispatcher),
            config,
            dispatcher,
            transport: Transport::new(),
            receiver: ReceiveControl::new(),
            listener: ListenControl::new(),
            settings: Mutex::new(None),
            client_lock: Mutex::new(()),
            state: Mutex::new(ConnectionState::Disconnected),
            last_error: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::debug!(target: targets::TCP, from = %previous, to = %state, "connection state changed");
        }
    }

    fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Record `err` and notify error observers.
    pub(crate) fn report(&self, err: NetworkError) {
        tracing::warn!(target: targets::TCP, %err, "socket error");
        *self.last_error.lock() = Some(err.clone());
        self.events.error.emit(err);
    }

    /// A fault that cost the connection: report it, then force the
    /// connection state down.
    pub(crate) fn fail(&self, err: NetworkError) {
        self.set_state(ConnectionState::Disconnected);
        self.report(err);
        self.events.connect_state.emit(false);
    }

    /// Stop receiving and drop the current stream. Emits nothing.
    fn release_stream(&self) {
        receive::stop(self, true);
        // Unblocks an in-flight read so the read lock frees up promptly.
        self.transport.shutdown_current();

        let _read = self.transport.lock_read();
        self.drop_stream_locked();
    }

    /// Shut down and drop the current stream. Emits nothing.
    ///
    /// Caller holds the read lock.
    pub(crate) fn drop_stream_locked(&self) {
        if let Some(stream) = self.transport.replace(None) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Install a connected stream and announce it.
    fn install_stream(&self, stream: TcpStream) {
        {
            let _read = self.transport.lock_read();
            self.transport.replace(Some(stream));
            self.set_state(ConnectionState::Connected);
        }
        self.events.connect_state.emit(true);
    }

    fn settings(&self) -> Option<ConnectionSettings> {
        self.settings.lock().clone()
    }

    /// Validate and store a connection string. Invalid input is reported.
    fn apply_connection_string(&self, connection_string: &str) -> bool {
        match ConnectionSettings::parse(connection_string) {
            Ok(settings) => {
                *self.settings.lock() = Some(settings);
                true
            }
            Err(err) => {
                self.report(err);
                false
            }
        }
    }
}

fn open_stream(target: SocketAddr, timeout: Duration, config: &SocketConfig) -> Result<TcpStream> {
    if timeout.is_zero() {
        return Err(NetworkError::Timeout(timeout));
    }
    let stream = TcpStream::connect_timeout(&target, timeout)
        .map_err(|err| NetworkError::from_connect(err, timeout))?;
    configure_stream(&stream, config)?;
    Ok(stream)
}

fn parse_ip(address: &str, port: u16) -> Result<IpAddr> {
    address
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(format!("{address}:{port}")))
}

/// An event-driven TCP endpoint.
///
/// A manager owns at most one connection (outbound, or accepted by another
/// manager's listener), at most one accept loop and at most one receive
/// session. State changes and received data are announced through
/// [`SocketEvents`]; local operations report failure with `false` or an
/// empty result and raise the details on the `error` signal.
///
/// # Example
///
/// ```no_run
/// use linewire_net::SocketManager;
/// use std::time::Duration;
///
/// let manager = SocketManager::builder()
///     .connection_string("127.0.0.1:5025")
///     .on_connect_state(|connected| println!("connected: {connected}"))
///     .on_data_received(|line| print!("{line}"))
///     .on_error(|err| eprintln!("error: {err}"))
///     .build();
///
/// if manager.connect() {
///     manager.start_receive_async('\n');
///     manager.write("*IDN?\n");
/// }
/// std::thread::sleep(Duration::from_secs(1));
/// manager.close();
/// ```
pub struct SocketManager {
    shared: Arc<Shared>,
}

impl Default for SocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketManager {
    /// A manager with default configuration and no connection settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SocketManagerBuilder {
        SocketManagerBuilder::default()
    }

    /// A manager targeting `connection_string`.
    ///
    /// An invalid string is recorded as the last error; the manager is still
    /// returned, without settings.
    pub fn from_connection_string(connection_string: &str) -> Self {
        Self::builder().connection_string(connection_string).build()
    }

    /// Wrap an already connected stream, such as one accepted by a listener.
    ///
    /// The manager starts out connected. No `connect_state` is emitted for
    /// the adoption itself.
    pub fn from_stream(
        stream: TcpStream,
        config: SocketConfig,
        dispatcher: GroupedTaskQueue,
    ) -> Result<Self> {
        configure_stream(&stream, &config)?;
        let settings = match stream.peer_addr()? {
            SocketAddr::V4(peer) => Some(ConnectionSettings::new(*peer.ip(), peer.port())),
            SocketAddr::V6(_) => None,
        };

        let shared = Shared::new(config, dispatcher);
        *shared.settings.lock() = settings;
        {
            let _read = shared.transport.lock_read();
            shared.transport.replace(Some(stream));
        }
        *shared.state.lock() = ConnectionState::Connected;

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// The observer lists of this manager.
    pub fn events(&self) -> &SocketEvents {
        &self.shared.events
    }

    /// The queue notifications are delivered through.
    pub fn dispatcher(&self) -> &GroupedTaskQueue {
        &self.shared.dispatcher
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    pub fn settings(&self) -> Option<ConnectionSettings> {
        self.shared.settings()
    }

    /// Replace the connection settings.
    ///
    /// Returns `false` and raises an error notification if the string is
    /// invalid; the previous settings are kept in that case.
    pub fn set_connection_string(&self, connection_string: &str) -> bool {
        self.shared.apply_connection_string(connection_string)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Whether a stream is installed and the connection is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.shared.transport.is_open()
    }

    pub fn listen_state(&self) -> ListenState {
        self.shared.listener.state()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listener.is_active() && self.listen_state() == ListenState::Listening
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.shared.receiver.state()
    }

    pub fn is_receiving(&self) -> bool {
        self.shared.receiver.is_active()
    }

    /// Address the listener is bound to, while one is running.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.shared.listener.local_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .transport
            .current()
            .and_then(|stream| stream.local_addr().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared
            .transport
            .current()
            .and_then(|stream| stream.peer_addr().ok())
    }

    /// The most recent error, cleared by each connect or listen attempt.
    pub fn last_error(&self) -> Option<NetworkError> {
        self.shared.last_error.lock().clone()
    }

    pub fn has_error(&self) -> bool {
        self.shared.last_error.lock().is_some()
    }

    /// Block until every notification scheduled so far has been delivered.
    pub fn wait_for_events(&self, timeout: Duration) -> bool {
        self.shared.dispatcher.wait_idle(timeout)
    }

    /// Connect using the stored settings and the configured timeout.
    pub fn connect(&self) -> bool {
        self.connect_with_timeout(self.shared.config.connect_timeout)
    }

    /// Connect using the stored settings.
    pub fn connect_with_timeout(&self, timeout: Duration) -> bool {
        match self.shared.settings() {
            Some(settings) => {
                self.connect_to(&settings.ip_address().to_string(), settings.port(), timeout)
            }
            None => {
                let _client = self.shared.client_lock.lock();
                self.shared.clear_error();
                self.shared.fail(NetworkError::NoSettings);
                false
            }
        }
    }

    /// Open a connection to `address:port`, replacing any current one.
    ///
    /// A running receive session is stopped. On success `connect_state(true)`
    /// is emitted; on failure the error is recorded and `error` is followed
    /// by `connect_state(false)`.
    #[tracing::instrument(skip(self), target = "linewire_net::tcp", level = "debug")]
    pub fn connect_to(&self, address: &str, port: u16, timeout: Duration) -> bool {
        let shared = &self.shared;
        let _client = shared.client_lock.lock();
        shared.clear_error();
        shared.release_stream();
        shared.set_state(ConnectionState::Connecting);

        let opened = parse_ip(address, port)
            .and_then(|ip| open_stream(SocketAddr::new(ip, port), timeout, &shared.config));

        match opened {
            Ok(stream) => {
                shared.install_stream(stream);
                true
            }
            Err(err) => {
                shared.fail(err);
                false
            }
        }
    }

    /// Stop receiving and listening, drop the stream and emit
    /// `connect_state(false)`.
    ///
    /// Safe to call at any time, any number of times.
    #[tracing::instrument(skip(self), target = "linewire_net::tcp", level = "debug")]
    pub fn close(&self) {
        let shared = &self.shared;
        let _client = shared.client_lock.lock();
        shared.listener.stop();
        shared.release_stream();
        shared.set_state(ConnectionState::Disconnected);
        shared.events.connect_state.emit(false);
    }

    /// Listen on the address of the stored settings.
    pub fn listen(&self) -> bool {
        match self.shared.settings() {
            Some(settings) => self.listen_on(&settings.ip_address().to_string(), settings.port()),
            None => {
                self.shared.clear_error();
                self.shared.report(NetworkError::NoSettings);
                self.shared.events.listen_state.emit(false);
                false
            }
        }
    }

    /// (Re)start the accept loop on `address:port`.
    ///
    /// Each accepted client is announced on `client_connected` as a new,
    /// already connected manager. Port 0 binds an ephemeral port; see
    /// [`listen_addr`](Self::listen_addr).
    #[tracing::instrument(skip(self), target = "linewire_net::tcp", level = "debug")]
    pub fn listen_on(&self, address: &str, port: u16) -> bool {
        let shared = &self.shared;
        shared.clear_error();

        let started = parse_ip(address, port)
            .and_then(|ip| listener::start(shared, SocketAddr::new(ip, port)));

        match started {
            Ok(()) => true,
            Err(err) => {
                shared.report(err);
                shared.events.listen_state.emit(false);
                false
            }
        }
    }

    /// Ask the accept loop to exit. Does not wait for it.
    pub fn stop_listen(&self) {
        self.shared.listener.stop();
    }

    /// Receive terminator-framed text on a background thread.
    ///
    /// Returns `true` if a session is running afterwards (including one that
    /// was already running) and `false` when there is no stream.
    pub fn start_receive_async(&self, terminator: char) -> bool {
        receive::start(&self.shared, Framing::terminator(terminator))
    }

    /// Receive `start(?s)(.*?)end` framed messages on a background thread.
    ///
    /// An invalid pattern is reported on `error` and returns `false`.
    pub fn start_receive_messages(&self, start: &str, end: &str) -> bool {
        match Framing::pattern(start, end) {
            Ok(framing) => self.start_receive(framing),
            Err(err) => {
                self.shared.report(err);
                false
            }
        }
    }

    /// Start a receive session with explicit framing.
    pub fn start_receive(&self, framing: Framing) -> bool {
        receive::start(&self.shared, framing)
    }

    /// Stop the receive session.
    ///
    /// With `force` the call returns immediately; otherwise it waits up to
    /// `stop_timeout` for the loop to exit.
    pub fn stop_receive_async(&self, force: bool) {
        receive::stop(&self.shared, force);
    }

    /// Run `op` on the current stream under the read lock.
    fn with_reader<T, F>(&self, op: F) -> T
    where
        T: Default,
        F: FnOnce(&mut &TcpStream, &SocketConfig) -> std::io::Result<T>,
    {
        let shared = &self.shared;
        let _read = shared.transport.lock_read();
        let Some(stream) = shared.transport.current() else {
            return T::default();
        };

        let mut source: &TcpStream = &stream;
        match op(&mut source, &shared.config) {
            Ok(value) => value,
            Err(err) => {
                shared.drop_stream_locked();
                shared.fail(err.into());
                T::default()
            }
        }
    }

    /// Whatever text is available right now, without waiting.
    pub fn read(&self) -> String {
        let bytes = self.with_reader(|source, config| {
            reader::read_available(source, config.read_buffer_size)
        });
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Text up to and including `terminator`, or what arrived before the
    /// read timeout.
    pub fn read_until(&self, terminator: char) -> String {
        let mut encoded = [0u8; 4];
        let terminator = terminator.encode_utf8(&mut encoded).as_bytes();
        let bytes = self.with_reader(|source, config| {
            reader::read_until_terminator(
                source,
                terminator,
                config.read_buffer_size,
                config.read_timeout,
            )
        });
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Text up to and including `sequence`. Reads byte by byte, so nothing
    /// after the sequence is consumed.
    pub fn read_until_str(&self, sequence: &str) -> String {
        let bytes = self.with_reader(|source, config| {
            reader::read_until_sequence(source, sequence.as_bytes(), config.read_timeout)
        });
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The first chunk of bytes to arrive within the read timeout.
    pub fn read_bytes(&self) -> Vec<u8> {
        self.with_reader(|source, config| {
            reader::read_first_chunk(source, config.read_buffer_size, config.read_timeout)
        })
    }

    /// Bytes up to and including `terminator`.
    pub fn read_bytes_until(&self, terminator: u8) -> Vec<u8> {
        self.with_reader(|source, config| {
            reader::read_until_terminator(
                source,
                &[terminator],
                config.read_buffer_size,
                config.read_timeout,
            )
        })
    }

    /// Discard all inbound bytes that are currently available.
    pub fn flush(&self) -> usize {
        let discarded = self.with_reader(|source, config| {
            reader::discard_available(source, config.read_buffer_size)
        });
        if discarded > 0 {
            tracing::trace!(target: targets::TCP, discarded, "flushed inbound bytes");
        }
        discarded
    }

    /// Write `text` to the connection.
    pub fn write(&self, text: &str) -> bool {
        self.write_bytes(text.as_bytes())
    }

    /// Write `bytes` to the connection.
    ///
    /// Returns `false` without a notification when there is no stream; a
    /// failed write is reported and forces the connection state down.
    pub fn write_bytes(&self, bytes: &[u8]) -> bool {
        match self.shared.transport.write_all(bytes) {
            Ok(()) => true,
            Err(NetworkError::NotConnected) => false,
            Err(err) => {
                self.shared.fail(err);
                false
            }
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.shared.events.disconnect_all();
        self.close();
    }
}

impl std::fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketManager")
            .field("settings", &self.settings())
            .field("state", &self.state())
            .field("listen_state", &self.listen_state())
            .field("receive_state", &self.receive_state())
            .finish()
    }
}

type Registration = Box<dyn FnOnce(&SocketEvents)>;

/// Builder for [`SocketManager`].
///
/// Observers registered here are connected before the manager can emit
/// anything, so none of its notifications are missed.
#[derive(Default)]
pub struct SocketManagerBuilder {
    connection_string: Option<String>,
    config: SocketConfig,
    dispatcher: Option<GroupedTaskQueue>,
    registrations: Vec<Registration>,
}

impl SocketManagerBuilder {
    /// Target `"<ipv4-address>:<port>"`. Validated by [`build`](Self::build).
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.connection_string = Some(settings.connection_string());
        self
    }

    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver notifications through `dispatcher` instead of a private
    /// queue on the global pool.
    pub fn dispatcher(mut self, dispatcher: GroupedTaskQueue) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn on_connect_state<F>(self, observer: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.connect_state.connect(move |&connected| observer(connected));
        })
    }

    pub fn on_listen_state<F>(self, observer: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.listen_state.connect(move |&listening| observer(listening));
        })
    }

    pub fn on_receive_state<F>(self, observer: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.receive_state.connect(move |&receiving| observer(receiving));
        })
    }

    pub fn on_data_received<F>(self, observer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.data_received.connect(move |text| observer(text));
        })
    }

    /// Observe pattern-framed messages as `(message, pattern)`.
    pub fn on_message_received<F>(self, observer: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events
                .message_received
                .connect(move |(message, pattern)| observer(message, pattern));
        })
    }

    pub fn on_client_connected<F>(self, observer: F) -> Self
    where
        F: Fn(&Arc<SocketManager>) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.client_connected.connect(observer);
        })
    }

    pub fn on_error<F>(self, observer: F) -> Self
    where
        F: Fn(&NetworkError) + Send + Sync + 'static,
    {
        self.register(move |events| {
            events.error.connect(observer);
        })
    }

    fn register(mut self, registration: impl FnOnce(&SocketEvents) + 'static) -> Self {
        self.registrations.push(Box::new(registration));
        self
    }

    /// Build the manager.
    ///
    /// An invalid connection string is raised on `error` (after observers
    /// are connected) and leaves the manager without settings.
    pub fn build(self) -> SocketManager {
        let dispatcher = self.dispatcher.unwrap_or_default();
        let shared = Arc::new(Shared::new(self.config, dispatcher));

        for registration in self.registrations {
            registration(&shared.events);
        }
        if let Some(connection_string) = self.connection_string {
            shared.apply_connection_string(&connection_string);
        }

        SocketManager { shared }
    }
}

impl std::fmt::Debug for SocketManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketManagerBuilder")
            .field("connection_string", &self.connection_string)
            .field("config", &self.config)
            .field("observers", &self.registrations.len())
            .finish()
    }
}
