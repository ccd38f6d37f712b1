//! Datagram transport abstraction
//!
//! [`NetManager`](crate::NetManager) never blocks inside `poll()`, so the
//! [`Transport`] trait is a pair of non-blocking calls that report
//! [`io::ErrorKind::WouldBlock`] when nothing can be done right now. The
//! built-in [`UdpTransport`] wraps `tokio::net::UdpSocket`; the
//! [`memory`] module provides a deterministic in-process network for tests.

use std::io;
use std::net::SocketAddr;

pub mod memory;

/// Non-blocking datagram transport driven by the poll loop.
///
/// Implementors must be cheap to call repeatedly and must never block.
pub trait Transport: Send + 'static {
    /// Send `buf` to `target` as one datagram, returning the bytes written.
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning `(bytes_read, source)`.
    /// Returns `WouldBlock` when no datagram is queued.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Return the local address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

mod udp {
    use super::*;
    use tokio::net::UdpSocket;

    /// Default [`Transport`] implementation wrapping a `tokio::net::UdpSocket`.
    ///
    /// Readiness is tracked by the tokio reactor, so the socket must be created
    /// and polled from within a runtime that gets to run between `poll()`
    /// calls (for example by awaiting an interval tick).
    #[derive(Debug)]
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        /// Bind a new UDP socket to `addr`.
        pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
            let socket = UdpSocket::bind(addr).await?;
            Self::ready(socket).await
        }

        /// Wrap an existing `UdpSocket`.
        pub async fn new(socket: UdpSocket) -> io::Result<Self> {
            Self::ready(socket).await
        }

        async fn ready(socket: UdpSocket) -> io::Result<Self> {
            // Register write interest so the first try_send_to succeeds
            socket.writable().await?;
            Ok(Self { socket })
        }
    }

    impl Transport for UdpTransport {
        fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            self.socket.try_send_to(buf, target)
        }

        fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.socket.try_recv_from(buf)
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }
    }
}

pub use udp::UdpTransport;
