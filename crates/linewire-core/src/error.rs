//! Error types for the dispatch engine.

/// Errors raised while setting up or using the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The global dispatch pool has already been initialized.
    #[error("Dispatch pool has already been initialized")]
    AlreadyInitialized,

    /// The underlying worker pool could not be built.
    #[error("Failed to create dispatch pool: {0}")]
    PoolCreation(String),

    /// A barrier or idle wait did not complete in time.
    #[error("Timed out after {0:?} waiting for queued work")]
    Timeout(std::time::Duration),

    /// The queue was dropped before the queued work could run.
    #[error("Dispatch queue was dropped before the work completed")]
    Disconnected,
}

/// A specialized Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
