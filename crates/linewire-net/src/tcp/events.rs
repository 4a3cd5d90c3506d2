//! Observer categories of a socket manager.

use std::sync::Arc;

use linewire_core::{GroupId, GroupedTaskQueue, Route, Signal, TaskMode};

use super::manager::SocketManager;
use crate::error::NetworkError;

/// Group carrying `error` and `connect_state`, so an error is always seen
/// before the disconnect it caused.
pub const CONNECTION_GROUP: &str = "connection-state";

/// Group carrying `listen_state` and `client_connected`.
pub const LISTEN_GROUP: &str = "listen-state";

/// The signals a [`SocketManager`] emits.
///
/// Delivery always goes through the manager's dispatcher, never inline:
///
/// - `connect_state`, `error` on [`CONNECTION_GROUP`]
/// - `listen_state`, `client_connected` on [`LISTEN_GROUP`]
/// - `receive_state`, `data_received`, `message_received` on the
///   dispatcher's default group
///
/// Every route is serial, so each category sees emissions in emit order.
pub struct SocketEvents {
    /// `true` after a successful connect, `false` on close or failure.
    pub connect_state: Signal<bool>,
    /// `true` once the accept loop runs, `false` when it exits.
    pub listen_state: Signal<bool>,
    /// `true` when a receive session starts, `false` when it ends.
    pub receive_state: Signal<bool>,
    /// One terminator-framed chunk of text.
    pub data_received: Signal<String>,
    /// One pattern-framed message and the pattern that matched it.
    pub message_received: Signal<(String, String)>,
    /// A client accepted by the listen loop.
    pub client_connected: Signal<Arc<SocketManager>>,
    pub error: Signal<NetworkError>,
}

impl SocketEvents {
    pub(crate) fn new(dispatcher: &GroupedTaskQueue) -> Self {
        let connection = Route::new(
            dispatcher.clone(),
            GroupId::named(CONNECTION_GROUP),
            TaskMode::Serial,
        );
        let listen = Route::new(
            dispatcher.clone(),
            GroupId::named(LISTEN_GROUP),
            TaskMode::Serial,
        );
        let data = Route::default_group(dispatcher.clone());

        Self {
            connect_state: Signal::new(connection.clone()),
            error: Signal::new(connection),
            listen_state: Signal::new(listen.clone()),
            client_connected: Signal::new(listen),
            receive_state: Signal::new(data.clone()),
            data_received: Signal::new(data.clone()),
            message_received: Signal::new(data),
        }
    }

    /// Drop every observer of every category.
    pub fn disconnect_all(&self) {
        self.connect_state.disconnect_all();
        self.listen_state.disconnect_all();
        self.receive_state.disconnect_all();
        self.data_received.disconnect_all();
        self.message_received.disconnect_all();
        self.client_connected.disconnect_all();
        self.error.disconnect_all();
    }
}

impl std::fmt::Debug for SocketEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketEvents")
            .field("connect_state", &self.connect_state)
            .field("listen_state", &self.listen_state)
            .field("receive_state", &self.receive_state)
            .field("data_received", &self.data_received)
            .field("message_received", &self.message_received)
            .field("client_connected", &self.client_connected)
            .field("error", &self.error)
            .finish()
    }
}
