//! Logging facilities for linewire.
//!
//! linewire uses the `tracing` crate for instrumentation. Nothing is printed
//! unless the application installs a subscriber:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("linewire_core=debug,linewire_net=debug")
//!     .init();
//! ```
//!
//! Every event carries one of the [`targets`] below so a single subsystem can
//! be turned up without drowning in the rest.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "linewire_core";
    /// Dispatch pool target.
    pub const POOL: &str = "linewire_core::pool";
    /// Serial and grouped task queue target.
    pub const QUEUE: &str = "linewire_core::queue";
    /// Signal emission target.
    pub const SIGNAL: &str = "linewire_core::signal";
}

/// Render a panic payload for logging.
///
/// Panics raised with a string literal or a formatted message are shown
/// verbatim; anything else is reported as an opaque payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
