//! Connection manager and socket loop.
//!
//! [`NetManager`] owns the transport and every peer. All work happens inside
//! [`poll`](NetManager::poll): queued cross-task commands are applied, every
//! available datagram is read and dispatched, then each peer's timers run and
//! its outgoing datagrams are written. Nothing runs in the background.

use crate::config::NetConfig;
use crate::connection::{ConnectionRequest, DisconnectReason};
use crate::error::{ConnectionError, NetError, Result};
use crate::event::NetEvent;
use crate::handle::{Command, SendHandle};
use crate::metrics::NetStatistics;
use crate::peer::{ConnectionState, Peer, PeerId, PeerInfo};
use crate::protocol::{self, DeliveryMode, Packet, PROTOCOL_ID};
use crate::transport::{Transport, UdpTransport};

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const REJECT_INVALID_KEY: &[u8] = b"invalid key";
const REJECT_INVALID_PROTOCOL: &[u8] = b"invalid protocol";
const REJECT_FULL: &[u8] = b"server full";

/// Recently removed peers remembered for error reporting
const DEPARTED_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    WouldBlock,
    Failed,
}

/// Write one framed datagram, sealing it with a checksum when `checksum` is set
fn send_datagram<T: Transport>(
    transport: &T,
    stats: &mut NetStatistics,
    events: &mut Vec<NetEvent>,
    addr: SocketAddr,
    datagram: &[u8],
    checksum: bool,
) -> SendOutcome {
    let sealed;
    let wire = if checksum {
        sealed = protocol::seal(datagram);
        &sealed[..]
    } else {
        datagram
    };
    match transport.try_send_to(wire, addr) {
        Ok(_) => {
            stats.record_sent(wire.len());
            SendOutcome::Sent
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            trace!(addr = %addr, "Socket not writable, dropping datagram");
            SendOutcome::WouldBlock
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "Send failed");
            events.push(NetEvent::NetworkError {
                addr: Some(addr),
                error: NetError::send_failed(e.to_string()),
            });
            SendOutcome::Failed
        }
    }
}

/// Reliable UDP endpoint that can both connect out and accept connections
pub struct NetManager<T: Transport = UdpTransport> {
    transport: T,
    config: NetConfig,
    local_addr: SocketAddr,
    peers: HashMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    pending_requests: HashMap<SocketAddr, ConnectionRequest>,
    /// Why recently removed peers left, and the window that expired for timeouts
    departed: VecDeque<(PeerId, DisconnectReason, Duration)>,
    next_peer_id: u32,
    events: Vec<NetEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    recv_buf: Vec<u8>,
    stats: NetStatistics,
    retired: NetStatistics,
    clock: Instant,
    running: bool,
}

impl NetManager<UdpTransport> {
    /// Bind a UDP socket to `addr`
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs, config: NetConfig) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(addr).await?;
        Self::with_transport(transport, config)
    }

    /// Bind a UDP socket on all interfaces. Port 0 picks an ephemeral port.
    pub async fn listen(port: u16, config: NetConfig) -> Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port)), config).await
    }
}

impl<T: Transport> NetManager<T> {
    /// Run over an arbitrary transport
    pub fn with_transport(transport: T, config: NetConfig) -> Result<Self> {
        config.validate()?;
        let local_addr = transport.local_addr()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        info!(addr = %local_addr, mtu = config.mtu, "Network manager started");

        Ok(Self {
            transport,
            recv_buf: vec![0u8; config.recv_buffer_size],
            config,
            local_addr,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            pending_requests: HashMap::new(),
            departed: VecDeque::new(),
            next_peer_id: 1,
            events: Vec::new(),
            cmd_tx,
            cmd_rx,
            stats: NetStatistics::default(),
            retired: NetStatistics::default(),
            clock: Instant::now(),
            running: true,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Clonable handle for sending from other tasks
    pub fn handle(&self) -> SendHandle {
        SendHandle::new(self.cmd_tx.clone())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running {
            Ok(())
        } else {
            Err(NetError::connection(ConnectionError::Closed))
        }
    }

    fn allocate_id(&mut self) -> PeerId {
        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        id
    }

    /// Start a handshake with `addr`, presenting `key`.
    ///
    /// Returns immediately with a peer in the `Connecting` state. The outcome
    /// arrives from `poll()` as [`NetEvent::Connected`] or
    /// [`NetEvent::Disconnected`] with reason `ConnectionRejected` or `Timeout`.
    pub fn connect(&mut self, addr: SocketAddr, key: &str) -> Result<PeerId> {
        self.ensure_running()?;

        if let Some(&id) = self.by_addr.get(&addr) {
            debug!(peer = %id, addr = %addr, "Already connected or connecting");
            return Ok(id);
        }

        let id = self.allocate_id();
        let connection_id = rand::random::<u64>();
        // Timers start at the peer's first update, not at self.clock
        let peer = Peer::connecting(id, addr, key.to_string(), connection_id, &self.config, self.clock);
        self.peers.insert(id, peer);
        self.by_addr.insert(addr, id);

        info!(peer = %id, addr = %addr, "Connecting");
        Ok(id)
    }

    /// Admit a pending connection request
    pub fn accept(&mut self, request: ConnectionRequest) -> Result<PeerId> {
        self.ensure_running()?;
        self.take_pending(&request)?;

        let incoming = self.peers.values().filter(|peer| !peer.outgoing).count();
        if incoming >= self.config.max_connections {
            debug!(addr = %request.addr, limit = self.config.max_connections, "Connection limit reached");
            self.transmit(
                request.addr,
                &Packet::ConnectReject {
                    connection_id: request.connection_id,
                    reason: Bytes::from_static(REJECT_FULL),
                },
            );
            return Err(NetError::ConnectionRejected);
        }

        let id = self.allocate_id();
        let peer = Peer::accepted(id, request.addr, request.connection_id, &self.config, self.clock);
        self.peers.insert(id, peer);
        self.by_addr.insert(request.addr, id);

        self.transmit(
            request.addr,
            &Packet::ConnectAccept {
                connection_id: request.connection_id,
            },
        );
        info!(peer = %id, addr = %request.addr, "Accepted connection");
        self.events.push(NetEvent::Connected {
            peer: id,
            addr: request.addr,
        });
        Ok(id)
    }

    /// Admit the request only if it carries `key`, rejecting it otherwise
    pub fn accept_if_key(&mut self, request: ConnectionRequest, key: &str) -> Result<PeerId> {
        if request.key == key {
            return self.accept(request);
        }
        debug!(addr = %request.addr, "Connection key mismatch");
        self.reject(request, REJECT_INVALID_KEY)?;
        Err(NetError::ConnectionRejected)
    }

    /// Refuse a pending connection request, sending `reason` to the remote
    pub fn reject(&mut self, request: ConnectionRequest, reason: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.take_pending(&request)?;
        self.transmit(
            request.addr,
            &Packet::ConnectReject {
                connection_id: request.connection_id,
                reason: Bytes::copy_from_slice(reason),
            },
        );
        debug!(addr = %request.addr, "Rejected connection");
        Ok(())
    }

    fn take_pending(&mut self, request: &ConnectionRequest) -> Result<()> {
        match self.pending_requests.get(&request.addr) {
            Some(pending) if pending.connection_id == request.connection_id => {
                self.pending_requests.remove(&request.addr);
                Ok(())
            }
            _ => Err(NetError::connection(ConnectionError::StaleRequest)),
        }
    }

    /// Queue `payload` for `peer` on the channel for `mode`.
    ///
    /// A peer that recently timed out fails with
    /// [`NetError::ConnectionTimeout`], one that was refused with
    /// [`NetError::ConnectionRejected`].
    pub fn send(&mut self, peer: PeerId, payload: impl Into<Bytes>, mode: DeliveryMode) -> Result<()> {
        self.ensure_running()?;
        let Some(target) = self.peers.get_mut(&peer) else {
            return Err(self.missing_peer(peer));
        };
        target.send(payload.into(), mode, &self.config)
    }

    /// Error for an operation on a peer that is not in the table
    fn missing_peer(&self, id: PeerId) -> NetError {
        match self.departed.iter().find(|(departed, ..)| *departed == id) {
            Some((_, DisconnectReason::Timeout, window)) => {
                NetError::timeout(window.as_millis() as u64)
            }
            Some((_, DisconnectReason::ConnectionRejected, _)) => NetError::ConnectionRejected,
            Some(_) => NetError::connection(ConnectionError::NotConnected),
            None => NetError::connection(ConnectionError::UnknownPeer),
        }
    }

    /// Queue `payload` for every connected peer, returning how many were addressed
    pub fn send_to_all(&mut self, payload: impl Into<Bytes>, mode: DeliveryMode) -> Result<usize> {
        self.ensure_running()?;
        let payload = payload.into();
        let mut count = 0;
        for peer in self.peers.values_mut().filter(|peer| peer.is_connected()) {
            peer.send(payload.clone(), mode, &self.config)?;
            count += 1;
        }
        Ok(count)
    }

    /// Send one datagram to an address without a connection
    pub fn send_unconnected(&mut self, addr: SocketAddr, payload: impl Into<Bytes>) -> Result<()> {
        self.ensure_running()?;
        let mut datagram = Packet::Unconnected {
            payload: payload.into(),
        }
        .to_bytes();
        if datagram.len() > self.config.packet_budget(self.config.mtu) {
            return Err(NetError::buffer(format!(
                "Unconnected message of {} bytes exceeds MTU {}",
                datagram.len(),
                self.config.mtu
            )));
        }
        if self.config.checksum {
            datagram = protocol::seal(&datagram);
        }

        match self.transport.try_send_to(&datagram, addr) {
            Ok(_) => {
                self.stats.record_sent(datagram.len());
                Ok(())
            }
            Err(e) => Err(NetError::send_failed(e.to_string())),
        }
    }

    /// Disconnect a peer, notifying the remote side
    pub fn disconnect(&mut self, peer: PeerId) -> Result<()> {
        self.disconnect_with(peer, &[])
    }

    /// Disconnect a peer, attaching `data` to the notification
    pub fn disconnect_with(&mut self, peer: PeerId, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        let Some((addr, connection_id)) = self.peers.get(&peer).map(|p| (p.addr, p.connection_id)) else {
            return Err(self.missing_peer(peer));
        };

        self.transmit(
            addr,
            &Packet::Disconnect {
                connection_id,
                data: Bytes::copy_from_slice(data),
            },
        );
        self.remove_peer(peer, DisconnectReason::DisconnectPeerCalled, Bytes::new());
        Ok(())
    }

    /// Process everything that is due right now
    pub fn poll(&mut self) -> Result<Vec<NetEvent>> {
        self.poll_at(Instant::now())
    }

    /// Process everything that is due at `now`.
    ///
    /// Time never runs backwards: an earlier `now` than the previous call is
    /// treated as the previous call's time.
    pub fn poll_at(&mut self, now: Instant) -> Result<Vec<NetEvent>> {
        self.ensure_running()?;
        let now = now.max(self.clock);
        self.clock = now;

        self.drain_commands();
        self.receive_all(now);
        self.update_peers(now);

        let timeout = self.config.connect_timeout;
        self.pending_requests
            .retain(|_, request| now.saturating_duration_since(request.received_at) < timeout);

        Ok(std::mem::take(&mut self.events))
    }

    /// Disconnect every peer and close the manager. Later calls fail with
    /// `ConnectionError::Closed`.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        let farewells: Vec<_> = self
            .peers
            .values()
            .map(|peer| (peer.addr, peer.connection_id))
            .collect();
        for (addr, connection_id) in farewells {
            self.transmit(
                addr,
                &Packet::Disconnect {
                    connection_id,
                    data: Bytes::new(),
                },
            );
        }

        for (_, peer) in self.peers.drain() {
            self.retired += peer.stats;
        }
        self.by_addr.clear();
        self.pending_requests.clear();
        self.events.clear();
        self.cmd_rx.close();
        self.running = false;
        info!(addr = %self.local_addr, "Network manager stopped");
    }

    /// Snapshot of one peer
    pub fn peer_info(&self, peer: PeerId) -> Option<PeerInfo> {
        self.peers.get(&peer).map(Peer::info)
    }

    /// Snapshot of every peer
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().map(Peer::info).collect()
    }

    /// Number of peers that completed the handshake
    pub fn connected_peers_count(&self) -> usize {
        self.peers.values().filter(|peer| peer.is_connected()).count()
    }

    /// Traffic counters for this manager, including peers that already left
    pub fn statistics(&self) -> NetStatistics {
        let mut total = self.stats;
        let mut peers = self.retired;
        for peer in self.peers.values() {
            peers += peer.stats;
        }
        total.retransmissions = peers.retransmissions;
        total.duplicates_dropped = peers.duplicates_dropped;
        total.malformed_dropped += peers.malformed_dropped;
        total.assemblies_expired = peers.assemblies_expired;
        total
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Send {
                    peer,
                    payload,
                    mode,
                    reply,
                } => {
                    let result = self.send(peer, payload, mode);
                    if let Err(e) = &result {
                        debug!(peer = %peer, error = %e, "Queued send failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::SendToAll { payload, mode } => {
                    if let Err(e) = self.send_to_all(payload, mode) {
                        debug!(error = %e, "Queued broadcast failed");
                    }
                }
                Command::Disconnect { peer } => {
                    if let Err(e) = self.disconnect(peer) {
                        debug!(peer = %peer, error = %e, "Queued disconnect failed");
                    }
                }
            }
        }
    }

    fn receive_all(&mut self, now: Instant) {
        loop {
            match self.transport.try_recv_from(&mut self.recv_buf) {
                Ok((len, from)) => {
                    let datagram = Bytes::copy_from_slice(&self.recv_buf[..len]);
                    self.handle_datagram(from, datagram, now);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    trace!(error = %e, "Ignoring transient receive error");
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    self.events.push(NetEvent::NetworkError {
                        addr: None,
                        error: NetError::Io(e),
                    });
                    break;
                }
            }
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: Bytes, now: Instant) {
        let len = datagram.len();
        self.stats.record_received(len);
        if let Some(peer) = self.by_addr.get(&from).and_then(|id| self.peers.get_mut(id)) {
            peer.stats.record_received(len);
        }

        let framed = if self.config.checksum {
            protocol::unseal(datagram)
        } else {
            Ok(datagram)
        };
        let packet = match framed.and_then(Packet::decode) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(addr = %from, error = %e, "Dropping malformed datagram");
                self.stats.malformed_dropped += 1;
                return;
            }
        };

        let Packet::Merged { packets } = packet else {
            self.dispatch(from, packet, len, now);
            return;
        };
        trace!(addr = %from, count = packets.len(), "Unpacking merged datagram");
        for part in packets {
            match Packet::decode(part) {
                // Only a whole datagram can confirm a size
                Ok(packet) => self.dispatch(from, packet, 0, now),
                Err(e) => {
                    warn!(addr = %from, error = %e, "Dropping malformed merged packet");
                    self.stats.malformed_dropped += 1;
                }
            }
        }
    }

    /// Route one decoded packet. `wire_len` is the size of the datagram it
    /// arrived in, or zero when it shared that datagram.
    fn dispatch(&mut self, from: SocketAddr, packet: Packet, wire_len: usize, now: Instant) {
        match packet {
            Packet::ConnectRequest {
                protocol_id,
                connection_id,
                key,
            } => self.on_connect_request(from, protocol_id, connection_id, key, now),
            Packet::ConnectAccept { connection_id } => self.on_connect_accept(from, connection_id, now),
            Packet::ConnectReject {
                connection_id,
                reason,
            } => self.on_connect_reject(from, connection_id, reason),
            Packet::Disconnect {
                connection_id,
                data,
            } => self.on_disconnect(from, connection_id, data),
            Packet::Unconnected { payload } => {
                if self.config.unconnected_messages {
                    self.events.push(NetEvent::ReceiveUnconnected { addr: from, payload });
                } else {
                    trace!(addr = %from, "Unconnected messages disabled, dropping");
                }
            }
            packet => self.on_peer_packet(from, packet, wire_len, now),
        }
    }

    fn on_peer_packet(&mut self, from: SocketAddr, packet: Packet, wire_len: usize, now: Instant) {
        let Some(&id) = self.by_addr.get(&from) else {
            trace!(addr = %from, kind = ?packet.kind(), "Packet from unknown address");
            return;
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if !peer.is_connected() {
            trace!(peer = %id, kind = ?packet.kind(), "Packet before handshake completed");
            return;
        }
        peer.touch(now);

        match packet {
            Packet::Data(data) => peer.on_data(data, now, &mut self.events),
            Packet::Ack(ack) => peer.on_ack(&ack, now),
            Packet::Ping { sequence } => peer.on_ping(sequence),
            Packet::Pong { sequence } => {
                if let Some(rtt) = peer.on_pong(sequence, now) {
                    self.events.push(NetEvent::LatencyUpdate { peer: id, rtt });
                }
            }
            Packet::MtuCheck { mtu, .. } => peer.on_mtu_check(mtu, wire_len),
            Packet::MtuOk { mtu } => peer.on_mtu_ok(mtu, now),
            _ => {}
        }
    }

    fn on_connect_request(
        &mut self,
        from: SocketAddr,
        protocol_id: u32,
        connection_id: u64,
        key: String,
        now: Instant,
    ) {
        if protocol_id != PROTOCOL_ID {
            debug!(addr = %from, protocol_id, "Protocol mismatch");
            self.transmit(
                from,
                &Packet::ConnectReject {
                    connection_id,
                    reason: Bytes::from_static(REJECT_INVALID_PROTOCOL),
                },
            );
            return;
        }

        if let Some(&id) = self.by_addr.get(&from) {
            let Some(peer) = self.peers.get(&id) else {
                return;
            };
            if peer.connection_id == connection_id {
                if !peer.outgoing && peer.is_connected() {
                    trace!(peer = %id, "Repeating connect accept");
                    self.transmit(from, &Packet::ConnectAccept { connection_id });
                }
                return;
            }
            if peer.outgoing {
                trace!(peer = %id, "Ignoring request from a peer we are connecting to");
                return;
            }
            info!(peer = %id, addr = %from, "Peer reconnected with a new connection id");
            self.remove_peer(id, DisconnectReason::Reconnect, Bytes::new());
        }

        if let Some(pending) = self.pending_requests.get(&from) {
            if pending.connection_id == connection_id {
                return;
            }
        }

        let request = ConnectionRequest {
            addr: from,
            connection_id,
            key,
            received_at: now,
        };
        self.pending_requests.insert(from, request.clone());
        debug!(addr = %from, "Connection request");

        match self.config.accept_key.clone() {
            Some(expected) => {
                if let Err(e) = self.accept_if_key(request, &expected) {
                    debug!(addr = %from, error = %e, "Automatic accept refused");
                }
            }
            None => self.events.push(NetEvent::ConnectionRequest(request)),
        }
    }

    fn on_connect_accept(&mut self, from: SocketAddr, connection_id: u64, now: Instant) {
        let Some(&id) = self.by_addr.get(&from) else {
            return;
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if !peer.outgoing || peer.connection_id != connection_id {
            trace!(peer = %id, "Ignoring unexpected connect accept");
            return;
        }

        if peer.state == ConnectionState::Connecting {
            peer.mark_connected(&self.config, now);
            info!(peer = %id, addr = %from, "Connected");
            self.events.push(NetEvent::Connected { peer: id, addr: from });
        } else {
            peer.touch(now);
        }
    }

    fn on_connect_reject(&mut self, from: SocketAddr, connection_id: u64, reason: Bytes) {
        let Some(&id) = self.by_addr.get(&from) else {
            return;
        };
        let rejected = self.peers.get(&id).is_some_and(|peer| {
            peer.outgoing
                && peer.state == ConnectionState::Connecting
                && peer.connection_id == connection_id
        });
        if rejected {
            self.remove_peer(id, DisconnectReason::ConnectionRejected, reason);
        }
    }

    fn on_disconnect(&mut self, from: SocketAddr, connection_id: u64, data: Bytes) {
        let Some(&id) = self.by_addr.get(&from) else {
            return;
        };
        let matches = self
            .peers
            .get(&id)
            .is_some_and(|peer| peer.connection_id == connection_id);
        if matches {
            self.remove_peer(id, DisconnectReason::RemoteConnectionClose, data);
        }
    }

    fn update_peers(&mut self, now: Instant) {
        let mut dropped = Vec::new();

        let checksum = self.config.checksum;
        for (&id, peer) in self.peers.iter_mut() {
            let update = peer.update(now, &self.config);

            let mut failed = false;
            peer.drain_outbox(&self.config, |addr, datagram| {
                match send_datagram(&self.transport, &mut self.stats, &mut self.events, addr, datagram, checksum) {
                    SendOutcome::Sent => true,
                    SendOutcome::WouldBlock => false,
                    SendOutcome::Failed => {
                        failed = true;
                        false
                    }
                }
            });

            if let Err(reason) = update {
                dropped.push((id, reason));
            } else if failed && peer.state == ConnectionState::Connecting {
                dropped.push((id, DisconnectReason::ConnectionFailed));
            }
        }

        for (id, reason) in dropped {
            self.remove_peer(id, reason, Bytes::new());
        }
    }

    fn transmit(&mut self, addr: SocketAddr, packet: &Packet) -> SendOutcome {
        let datagram = packet.to_bytes();
        let outcome = send_datagram(
            &self.transport,
            &mut self.stats,
            &mut self.events,
            addr,
            &datagram,
            self.config.checksum,
        );
        if outcome == SendOutcome::Sent {
            if let Some(peer) = self.by_addr.get(&addr).and_then(|id| self.peers.get_mut(id)) {
                peer.stats
                    .record_sent(datagram.len() + self.config.checksum_overhead());
            }
        }
        outcome
    }

    fn remember_departure(&mut self, id: PeerId, reason: DisconnectReason, window: Duration) {
        if self.departed.len() == DEPARTED_HISTORY {
            self.departed.pop_front();
        }
        self.departed.push_back((id, reason, window));
    }

    fn remove_peer(&mut self, id: PeerId, reason: DisconnectReason, data: Bytes) {
        let Some(mut peer) = self.peers.remove(&id) else {
            return;
        };
        self.by_addr.remove(&peer.addr);
        let window = if peer.state == ConnectionState::Connecting {
            self.config.connect_timeout
        } else {
            self.config.disconnect_timeout
        };
        peer.state = ConnectionState::Disconnected;
        self.retired += peer.stats;

        self.remember_departure(id, reason, window);

        info!(peer = %id, addr = %peer.addr, %reason, "Peer disconnected");
        self.events.push(NetEvent::Disconnected {
            peer: id,
            addr: peer.addr,
            reason,
            data,
        });
    }
}

impl<T: Transport> Drop for NetManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Transport> std::fmt::Debug for NetManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetManager")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peers.len())
            .field("running", &self.running)
            .finish()
    }
}
