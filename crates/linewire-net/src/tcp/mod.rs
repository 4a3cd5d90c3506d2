//! TCP socket management.
//!
//! [`SocketManager`] owns one connection, one optional accept loop and one
//! optional receive session, and reports everything that happens to them
//! through the [`SocketEvents`] signals.

mod config;
mod events;
mod framing;
mod listener;
mod manager;
mod reader;
mod receive;
mod state;
mod transport;

pub use config::{SocketConfig, StaleBufferPolicy};
pub use events::{CONNECTION_GROUP, LISTEN_GROUP, SocketEvents};
pub use framing::{Framing, MessagePattern};
pub use manager::{SocketManager, SocketManagerBuilder};
pub use state::{ConnectionState, ListenState, ReceiveState};
