//! State enums for connections, listeners and receive sessions.

/// Current state of the outbound (or accepted) connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable stream.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and ready to send/receive data.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Current state of the accept loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenState {
    #[default]
    NotListening,
    Listening,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotListening => write!(f, "NotListening"),
            Self::Listening => write!(f, "Listening"),
        }
    }
}

/// Current state of the receive session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReceiveState {
    #[default]
    Idle,
    Receiving,
}

impl std::fmt::Display for ReceiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Receiving => write!(f, "Receiving"),
        }
    }
}
