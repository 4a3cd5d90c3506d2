//! Prelude module for linewire.
//!
//! ```ignore
//! use linewire::prelude::*;
//! ```

// ============================================================================
// Dispatch
// ============================================================================

pub use crate::{GroupId, GroupedTaskQueue, Route, Signal, TaskMode};

// ============================================================================
// Sockets
// ============================================================================

#[cfg(feature = "networking")]
pub use crate::net::{
    ConnectionSettings, ConnectionState, Framing, NetworkError, SocketConfig, SocketManager,
};
