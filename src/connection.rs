//! Handshake types shared by the listening and connecting sides

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Why a peer left the connected set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The handshake could not be started or completed
    ConnectionFailed,
    /// Nothing was heard from the peer within the liveness window, a
    /// reliable packet ran out of retries, or the handshake timed out
    Timeout,
    /// The listener refused the request
    ConnectionRejected,
    /// The remote side disconnected
    RemoteConnectionClose,
    /// `disconnect` was called locally
    DisconnectPeerCalled,
    /// The same address connected again with a new connection id
    Reconnect,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::ConnectionFailed => "connection failed",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::ConnectionRejected => "connection rejected",
            DisconnectReason::RemoteConnectionClose => "remote connection close",
            DisconnectReason::DisconnectPeerCalled => "disconnect called",
            DisconnectReason::Reconnect => "reconnect",
        };
        f.write_str(name)
    }
}

/// An incoming handshake awaiting a decision.
///
/// Delivered through [`NetEvent::ConnectionRequest`](crate::NetEvent) and
/// resolved with [`NetManager::accept`](crate::NetManager::accept),
/// [`NetManager::accept_if_key`](crate::NetManager::accept_if_key) or
/// [`NetManager::reject`](crate::NetManager::reject).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub(crate) addr: SocketAddr,
    pub(crate) connection_id: u64,
    pub(crate) key: String,
    pub(crate) received_at: Instant,
}

impl ConnectionRequest {
    /// Remote address that sent the request
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection key presented by the remote side
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identifier chosen by the connecting side for this attempt
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// When the first copy of this request arrived
    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}
