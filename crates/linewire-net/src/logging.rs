//! Tracing targets for the networking crate.
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("linewire_net::receive=trace")
//!     .init();
//! ```

/// Target names for log filtering.
pub mod targets {
    /// Connection lifecycle: connect, close, writes, errors.
    pub const TCP: &str = "linewire_net::tcp";
    /// Accept loop.
    pub const LISTENER: &str = "linewire_net::listener";
    /// Receive sessions and framed reads.
    pub const RECEIVE: &str = "linewire_net::receive";
}
