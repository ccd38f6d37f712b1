//! Notifications returned from [`NetManager::poll`](crate::NetManager::poll)

use crate::connection::{ConnectionRequest, DisconnectReason};
use crate::error::NetError;
use crate::peer::PeerId;
use crate::protocol::DeliveryMode;

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Something the application should know about, in the order it happened
#[derive(Debug)]
pub enum NetEvent {
    /// A remote endpoint wants to connect and no `accept_key` is configured
    ConnectionRequest(ConnectionRequest),

    /// Handshake completed, on either side
    Connected { peer: PeerId, addr: SocketAddr },

    /// Peer left the connected set. `data` carries the remote's disconnect
    /// payload or reject reason, if any.
    Disconnected {
        peer: PeerId,
        addr: SocketAddr,
        reason: DisconnectReason,
        data: Bytes,
    },

    /// A complete message arrived
    Receive {
        peer: PeerId,
        payload: Bytes,
        mode: DeliveryMode,
    },

    /// A datagram from an address without a connection
    ReceiveUnconnected { addr: SocketAddr, payload: Bytes },

    /// Socket-level failure; `addr` is the destination or source involved
    NetworkError {
        addr: Option<SocketAddr>,
        error: NetError,
    },

    /// Smoothed round-trip time changed after a ping exchange
    LatencyUpdate { peer: PeerId, rtt: Duration },
}

impl NetEvent {
    /// Peer this event concerns, if any
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            NetEvent::Connected { peer, .. }
            | NetEvent::Disconnected { peer, .. }
            | NetEvent::Receive { peer, .. }
            | NetEvent::LatencyUpdate { peer, .. } => Some(*peer),
            _ => None,
        }
    }
}
