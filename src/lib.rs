//! # rudp-tokio
//!
//! Reliable messaging over UDP with five delivery modes, driven entirely by a
//! caller-owned `poll()` loop.
//!
//! ## Features
//!
//! - **Delivery modes**: unreliable, sequenced, reliable unordered, reliable
//!   ordered and reliable sequenced, each on its own per-peer channel
//! - **Selective acks**: 64-packet sliding window with a bitmask ack and
//!   RTT-adaptive retransmission
//! - **Fragmentation**: reliable messages larger than the MTU are split and
//!   reassembled transparently
//! - **Datagram efficiency**: small packets for one peer are merged into
//!   shared datagrams, and optional path MTU discovery raises the packet size
//! - **Integrity**: optional CRC-32 trailer on every datagram
//! - **Connection lifecycle**: shared-key handshake, keep-alive pings,
//!   timeouts and disconnect notifications
//! - **Deterministic**: no background tasks; time is an argument to
//!   [`NetManager::poll_at`], and [`transport::memory`] simulates loss,
//!   duplication and reordering from a seed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rudp_tokio::{DeliveryMode, NetConfig, NetEvent, NetManager};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = NetManager::listen(0, NetConfig::default()).await?;
//!     let server = client.connect("127.0.0.1:9050".parse()?, "test_key")?;
//!
//!     let mut tick = tokio::time::interval(Duration::from_millis(15));
//!     loop {
//!         tick.tick().await;
//!         for event in client.poll()? {
//!             match event {
//!                 NetEvent::Connected { peer, .. } => {
//!                     client.send(peer, &b"Hello"[..], DeliveryMode::ReliableOrdered)?;
//!                 }
//!                 NetEvent::Receive { payload, .. } => println!("got {payload:?}"),
//!                 NetEvent::Disconnected { peer, .. } if peer == server => return Ok(()),
//!                 _ => {}
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │     NetManager      │  connect / accept / send / poll / stop
//! ├─────────────────────┤
//! │        Peer         │  handshake state, pings, timeouts
//! ├─────────────────────┤
//! │  Channels + Frags   │  per-mode sequencing, acks, reassembly
//! ├─────────────────────┤
//! │   Packet Framer     │  protocol::Packet encode / decode
//! ├─────────────────────┤
//! │     Transport       │  tokio UdpSocket or in-memory network
//! └─────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod peer;
pub mod protocol;
pub mod reliability;
pub mod transport;

mod channel;
mod fragment;
mod mtu;

// Re-exports
pub use config::NetConfig;
pub use connection::{ConnectionRequest, DisconnectReason};
pub use error::{ConnectionError, NetError, Result};
pub use event::NetEvent;
pub use handle::SendHandle;
pub use manager::NetManager;
pub use metrics::{format_statistics, NetStatistics};
pub use peer::{ConnectionState, PeerId, PeerInfo};
pub use protocol::DeliveryMode;
pub use transport::{Transport, UdpTransport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
