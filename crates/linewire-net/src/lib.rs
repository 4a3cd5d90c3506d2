//! Event-driven TCP sockets for linewire.
//!
//! This crate turns blocking `std::net` sockets into an event-driven
//! endpoint:
//!
//! - **Connect/close lifecycle** with bounded connect timeouts
//! - **Accept loop** that hands each client over as its own [`SocketManager`]
//! - **Receive sessions** framing the byte stream by a terminator character
//!   or by a start/end regular expression pair
//! - **Ordered notifications**: every event goes through a
//!   [`linewire_core::GroupedTaskQueue`], so observers of one category see
//!   events in the order they happened, on the dispatch pool
//!
//! # Example
//!
//! ```no_run
//! use linewire_net::SocketManager;
//!
//! let server = SocketManager::builder()
//!     .on_client_connected(|client| {
//!         client.write("hello\n");
//!     })
//!     .build();
//! server.listen_on("127.0.0.1", 5000);
//!
//! let client = SocketManager::builder()
//!     .connection_string("127.0.0.1:5000")
//!     .on_data_received(|line| print!("got {line}"))
//!     .build();
//! if client.connect() {
//!     client.start_receive_async('\n');
//! }
//! ```
//!
//! # Errors
//!
//! Local operations return `false` or an empty value on failure. The cause
//! is kept as [`SocketManager::last_error`] and raised on the `error` signal;
//! faults that cost the connection are followed by `connect_state(false)`.

mod error;
pub mod logging;
pub mod settings;
pub mod tcp;

pub use error::{NetworkError, Result};
pub use settings::ConnectionSettings;
pub use tcp::{
    CONNECTION_GROUP, ConnectionState, Framing, LISTEN_GROUP, ListenState, MessagePattern,
    ReceiveState, SocketConfig, SocketEvents, SocketManager, SocketManagerBuilder,
    StaleBufferPolicy,
};
