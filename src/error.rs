//! Error types for the reliable UDP transport

use std::fmt;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors produced by the transport
#[derive(Error, Debug)]
pub enum NetError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote side refused the handshake (key mismatch or listener full)
    #[error("Connection rejected")]
    ConnectionRejected,

    /// Handshake or liveness window elapsed without traffic
    #[error("Connection timed out after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Connection state errors
    #[error("Connection error: {kind}")]
    Connection { kind: ConnectionError },

    /// Socket-level send failure
    #[error("Send failed: {message}")]
    SendFailed { message: String },

    /// Datagram could not be decoded
    #[error("Malformed packet: {message}")]
    MalformedPacket { message: String },

    /// Fragment reassembly abandoned before all parts arrived
    #[error("Reassembly of fragment group {fragment_id} timed out")]
    AssemblyTimeout { fragment_id: u16 },

    /// Payload or queue limits exceeded
    #[error("Buffer error: {message}")]
    Buffer { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Specific connection error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// Peer exists but has not finished the handshake or is gone
    NotConnected,
    /// No peer with this id
    UnknownPeer,
    /// Manager was stopped
    Closed,
    /// Connection request was already resolved or superseded
    StaleRequest,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NotConnected => write!(f, "peer not connected"),
            ConnectionError::UnknownPeer => write!(f, "unknown peer"),
            ConnectionError::Closed => write!(f, "manager closed"),
            ConnectionError::StaleRequest => write!(f, "connection request no longer pending"),
        }
    }
}

impl NetError {
    /// Create a connection error
    pub fn connection(kind: ConnectionError) -> Self {
        NetError::Connection { kind }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        NetError::ConnectionTimeout { timeout_ms }
    }

    /// Create a send failure
    pub fn send_failed(message: impl Into<String>) -> Self {
        NetError::SendFailed {
            message: message.into(),
        }
    }

    /// Create a framing error
    pub fn malformed(message: impl Into<String>) -> Self {
        NetError::MalformedPacket {
            message: message.into(),
        }
    }

    /// Create a buffer error
    pub fn buffer(message: impl Into<String>) -> Self {
        NetError::Buffer {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        NetError::Config {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            NetError::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                )
            }
            NetError::MalformedPacket { .. } => true,
            NetError::AssemblyTimeout { .. } => true,
            NetError::Buffer { .. } => true,
            NetError::SendFailed { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NetError::Connection { .. }
                | NetError::ConnectionRejected
                | NetError::ConnectionTimeout { .. }
        )
    }
}
