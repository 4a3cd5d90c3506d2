//! linewire - event-driven TCP sockets on an ordered event dispatcher.
//!
//! This is the umbrella crate that re-exports all public APIs.
//!
//! # Example
//!
//! ```no_run
//! use linewire::net::SocketManager;
//!
//! let manager = SocketManager::builder()
//!     .connection_string("127.0.0.1:5025")
//!     .on_data_received(|line| print!("{line}"))
//!     .build();
//!
//! if manager.connect() {
//!     manager.start_receive_async('\n');
//! }
//! ```

pub use linewire_core::*;

/// TCP socket management.
#[cfg(feature = "networking")]
pub mod net {
    pub use linewire_net::*;
}

pub mod prelude;

