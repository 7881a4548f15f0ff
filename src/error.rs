//! Error type shared by the whole crate.

use crate::stack::ConnectionId;

/// Errors surfaced by the stack.
///
/// Timer and estimator arithmetic never fails; every numeric result is
/// clamped into its configured range instead.
#[derive(thiserror::Error, Debug)]
pub enum TcpError {
    /// A configuration value failed validation at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Every receive buffer is leased to an open connection.
    #[error("All receive buffers are in use")]
    PoolExhausted,

    /// A bounded event queue was full and the event was dropped.
    #[error("Event queue full, event dropped")]
    QueueFull,

    /// The peer stayed unresponsive for the whole connection timeout.
    #[error("Connection timed out")]
    ConnectionTimedOut,

    /// No open connection has this id.
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection worker is gone.
    #[error("Closed")]
    Closed,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TcpError>;
