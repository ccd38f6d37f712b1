//! Per-peer connection state: lifecycle, liveness timers, channels and
//! fragment buffers.

use crate::channel::{ChannelSet, Delivery, FlushContext, Inbound};
use crate::config::NetConfig;
use crate::connection::DisconnectReason;
use crate::error::{ConnectionError, NetError, Result};
use crate::event::NetEvent;
use crate::fragment::{FragmentAssembler, Fragmenter};
use crate::metrics::NetStatistics;
use crate::mtu::MtuDiscovery;
use crate::protocol::{
    AckPacket, DataPacket, DeliveryMode, Packet, SeqNum, MERGE_ITEM_OVERHEAD, PROTOCOL_ID,
};
use crate::reliability::RttEstimator;

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Manager-local identifier of a peer. Never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) u32);

impl PeerId {
    /// Numeric value of this id
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Outgoing handshake in progress
    Connecting,
    /// Handshake complete, data may flow
    Connected,
    /// Removed from the manager
    Disconnected,
}

/// Point-in-time view of a peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    /// Smoothed round-trip time, once measured
    pub rtt: Option<Duration>,
    /// Current retransmission timeout
    pub rto: Duration,
    /// Largest datagram currently sent to this peer
    pub mtu: usize,
    /// Messages queued or awaiting acknowledgement
    pub pending: usize,
    pub stats: NetStatistics,
}

#[derive(Debug)]
pub(crate) struct Peer {
    pub(crate) id: PeerId,
    pub(crate) addr: SocketAddr,
    pub(crate) state: ConnectionState,
    pub(crate) connection_id: u64,
    /// We initiated this connection
    pub(crate) outgoing: bool,
    connect_key: String,
    /// Timers are anchored at the first update, not at construction
    started: bool,
    created_at: Instant,
    next_connect_attempt: Instant,
    last_received: Instant,
    next_ping: Instant,
    ping_sequence: SeqNum,
    ping_in_flight: Option<(SeqNum, Instant)>,
    rtt: RttEstimator,
    mtu: usize,
    mtu_probe: Option<MtuDiscovery>,
    channels: ChannelSet,
    fragmenter: Fragmenter,
    assembler: FragmentAssembler,
    pub(crate) stats: NetStatistics,
    outbox: Vec<Bytes>,
    scratch: Vec<Delivery>,
}

impl Peer {
    fn new(
        id: PeerId,
        addr: SocketAddr,
        connection_id: u64,
        state: ConnectionState,
        config: &NetConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            addr,
            state,
            connection_id,
            outgoing: false,
            connect_key: String::new(),
            started: false,
            created_at: now,
            next_connect_attempt: now,
            last_received: now,
            next_ping: now + config.ping_interval,
            ping_sequence: 0,
            ping_in_flight: None,
            rtt: RttEstimator::new(config.initial_rto, config.min_rto, config.max_rto),
            mtu: config.mtu,
            mtu_probe: None,
            channels: ChannelSet::new(),
            fragmenter: Fragmenter::new(),
            assembler: FragmentAssembler::new(config.fragment_timeout, config.max_fragments),
            stats: NetStatistics::default(),
            outbox: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Outgoing peer that will send connect requests until answered
    pub(crate) fn connecting(
        id: PeerId,
        addr: SocketAddr,
        key: String,
        connection_id: u64,
        config: &NetConfig,
        now: Instant,
    ) -> Self {
        let mut peer = Self::new(id, addr, connection_id, ConnectionState::Connecting, config, now);
        peer.outgoing = true;
        peer.connect_key = key;
        peer
    }

    /// Incoming peer admitted by the listener
    pub(crate) fn accepted(
        id: PeerId,
        addr: SocketAddr,
        connection_id: u64,
        config: &NetConfig,
        now: Instant,
    ) -> Self {
        Self::new(id, addr, connection_id, ConnectionState::Connected, config, now)
    }

    /// Anchor every timer at `now`. A peer may be created long after the
    /// manager last polled, so construction time is not trusted.
    fn start(&mut self, now: Instant, config: &NetConfig) {
        self.started = true;
        self.created_at = now;
        self.next_connect_attempt = now;
        self.last_received = now;
        self.next_ping = now + config.ping_interval;
        if self.is_connected() {
            self.begin_mtu_discovery(config, now);
        }
    }

    fn begin_mtu_discovery(&mut self, config: &NetConfig, now: Instant) {
        if config.mtu_discovery {
            self.mtu_probe = Some(MtuDiscovery::new(self.mtu, config.mtu_probe_interval, now));
        }
    }

    /// Outgoing handshake answered
    pub(crate) fn mark_connected(&mut self, config: &NetConfig, now: Instant) {
        self.state = ConnectionState::Connected;
        self.last_received = now;
        self.next_ping = now + config.ping_interval;
        self.connect_key.clear();
        self.begin_mtu_discovery(config, now);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Any datagram from the peer's address counts as a sign of life
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Queue a message on the channel for `mode`, fragmenting if needed
    pub(crate) fn send(&mut self, payload: Bytes, mode: DeliveryMode, config: &NetConfig) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::connection(ConnectionError::NotConnected));
        }

        if mode.header_size() + payload.len() <= config.packet_budget(self.mtu) {
            self.channels.get_mut(mode).enqueue(payload, None);
            return Ok(());
        }

        if !mode.can_fragment() {
            return Err(NetError::buffer(format!(
                "{} byte payload exceeds MTU {} and {mode} cannot fragment",
                payload.len(),
                self.mtu
            )));
        }

        let parts = self.fragmenter.split(
            &payload,
            config.fragment_payload_size(self.mtu),
            config.max_fragments,
        )?;
        trace!(peer = %self.id, fragments = parts.len(), size = payload.len(), "Fragmenting message");

        let channel = self.channels.get_mut(mode);
        for (header, chunk) in parts {
            channel.enqueue(chunk, Some(header));
        }
        Ok(())
    }

    /// Route a data packet through its channel and the reassembly buffer
    pub(crate) fn on_data(&mut self, packet: DataPacket, now: Instant, events: &mut Vec<NetEvent>) {
        let mode = packet.mode;
        let sequence = packet.sequence;
        let mut delivered = std::mem::take(&mut self.scratch);

        match self.channels.get_mut(mode).receive(packet, &mut delivered) {
            Inbound::Accepted => {}
            Inbound::Duplicate | Inbound::Stale => {
                trace!(peer = %self.id, %mode, seq = sequence, "Dropping duplicate or stale packet");
                self.stats.duplicates_dropped += 1;
            }
        }

        for delivery in delivered.drain(..) {
            let payload = match delivery.fragment {
                None => delivery.payload,
                Some(header) => match self.assembler.insert(header, delivery.payload, now) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(peer = %self.id, error = %e, "Discarding fragment");
                        self.stats.malformed_dropped += 1;
                        continue;
                    }
                },
            };
            events.push(NetEvent::Receive {
                peer: self.id,
                payload,
                mode,
            });
        }

        self.scratch = delivered;
    }

    pub(crate) fn on_ack(&mut self, ack: &AckPacket, now: Instant) {
        self.channels
            .get_mut(ack.mode)
            .handle_ack(ack, now, &mut self.rtt);
    }

    pub(crate) fn on_ping(&mut self, sequence: SeqNum) {
        self.outbox.push(Packet::Pong { sequence }.to_bytes());
    }

    /// Answer a probe that arrived intact at its advertised size
    pub(crate) fn on_mtu_check(&mut self, mtu: u16, wire_len: usize) {
        if wire_len != mtu as usize {
            trace!(peer = %self.id, mtu, wire_len, "Ignoring truncated MTU probe");
            return;
        }
        self.outbox.push(Packet::MtuOk { mtu }.to_bytes());
    }

    pub(crate) fn on_mtu_ok(&mut self, mtu: u16, now: Instant) {
        let raised = self
            .mtu_probe
            .as_mut()
            .and_then(|probe| probe.confirm(mtu as usize, now));
        if let Some(mtu) = raised {
            debug!(peer = %self.id, mtu, "Path MTU raised");
            self.mtu = mtu;
        }
    }

    /// Returns the new smoothed RTT when the pong answers our last ping
    pub(crate) fn on_pong(&mut self, sequence: SeqNum, now: Instant) -> Option<Duration> {
        let (expected, sent_at) = self.ping_in_flight?;
        if expected != sequence {
            return None;
        }
        self.ping_in_flight = None;
        self.rtt.update(now.saturating_duration_since(sent_at));
        self.rtt.srtt()
    }

    /// Drive timers and flush channels into the outbox.
    ///
    /// Fails with the reason the peer must be dropped.
    pub(crate) fn update(&mut self, now: Instant, config: &NetConfig) -> std::result::Result<(), DisconnectReason> {
        if !self.started {
            self.start(now, config);
        }
        match self.state {
            ConnectionState::Connecting => self.update_connecting(now, config),
            ConnectionState::Connected => self.update_connected(now, config),
            ConnectionState::Disconnected => Ok(()),
        }
    }

    fn update_connecting(&mut self, now: Instant, config: &NetConfig) -> std::result::Result<(), DisconnectReason> {
        if now.saturating_duration_since(self.created_at) >= config.connect_timeout {
            debug!(peer = %self.id, addr = %self.addr, "Handshake timed out");
            return Err(DisconnectReason::Timeout);
        }

        if now >= self.next_connect_attempt {
            trace!(peer = %self.id, addr = %self.addr, "Sending connect request");
            self.outbox.push(
                Packet::ConnectRequest {
                    protocol_id: PROTOCOL_ID,
                    connection_id: self.connection_id,
                    key: self.connect_key.clone(),
                }
                .to_bytes(),
            );
            self.next_connect_attempt = now + config.reconnect_delay;
        }
        Ok(())
    }

    fn update_connected(&mut self, now: Instant, config: &NetConfig) -> std::result::Result<(), DisconnectReason> {
        let silent = now.saturating_duration_since(self.last_received);
        if silent > config.disconnect_timeout {
            debug!(peer = %self.id, silent_ms = silent.as_millis() as u64, "Peer went silent");
            return Err(DisconnectReason::Timeout);
        }

        if now >= self.next_ping {
            self.ping_sequence = self.ping_sequence.wrapping_add(1);
            self.ping_in_flight = Some((self.ping_sequence, now));
            self.outbox.push(
                Packet::Ping {
                    sequence: self.ping_sequence,
                }
                .to_bytes(),
            );
            self.next_ping = now + config.ping_interval;
        }

        self.probe_mtu(now, config);

        let mut ctx = FlushContext {
            now,
            rto: self.rtt.rto(),
            max_rto: config.max_rto,
            max_retries: config.max_retries,
            out: &mut self.outbox,
        };
        match self.channels.flush(&mut ctx) {
            Ok(resent) => self.stats.retransmissions += resent as u64,
            Err(exhausted) => {
                debug!(
                    peer = %self.id,
                    seq = exhausted.sequence,
                    attempts = exhausted.attempts,
                    "Reliable packet ran out of retries"
                );
                return Err(DisconnectReason::Timeout);
            }
        }

        let expired = self.assembler.purge_expired(now);
        if !expired.is_empty() {
            debug!(peer = %self.id, groups = expired.len(), "Abandoned incomplete messages");
            self.stats.assemblies_expired += expired.len() as u64;
        }
        Ok(())
    }

    fn probe_mtu(&mut self, now: Instant, config: &NetConfig) {
        let Some(probe) = self.mtu_probe.as_mut() else {
            return;
        };
        if let Some(size) = probe.poll(now) {
            trace!(peer = %self.id, size, "Sending MTU probe");
            let packet = Packet::mtu_check(size as u16, config.checksum_overhead());
            self.outbox.push(packet.to_bytes());
        } else if probe.is_done() {
            debug!(peer = %self.id, mtu = probe.current(), "MTU discovery finished");
            self.mtu_probe = None;
        }
    }

    /// Hand every queued datagram to `transmit`, counting those it accepts.
    ///
    /// With merging enabled, runs of small packets are packed into shared
    /// datagrams no larger than the peer's MTU. Order is preserved.
    pub(crate) fn drain_outbox(
        &mut self,
        config: &NetConfig,
        mut transmit: impl FnMut(SocketAddr, &[u8]) -> bool,
    ) {
        let limit = config.packet_budget(self.mtu);
        let mut outbox = std::mem::take(&mut self.outbox);
        let mut datagrams = Vec::with_capacity(outbox.len());
        let mut batch = Vec::new();
        let mut batch_size = 1;

        for packet in outbox.drain(..) {
            let item = MERGE_ITEM_OVERHEAD + packet.len();
            if !config.merge_packets || 1 + item > limit {
                flush_batch(&mut batch, &mut datagrams);
                batch_size = 1;
                datagrams.push(packet);
                continue;
            }
            if batch_size + item > limit {
                flush_batch(&mut batch, &mut datagrams);
                batch_size = 1;
            }
            batch_size += item;
            batch.push(packet);
        }
        flush_batch(&mut batch, &mut datagrams);

        let overhead = config.checksum_overhead();
        for datagram in &datagrams {
            if transmit(self.addr, &datagram[..]) {
                self.stats.record_sent(datagram.len() + overhead);
            }
        }
        self.outbox = outbox;
    }

    pub(crate) fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            addr: self.addr,
            state: self.state,
            rtt: self.rtt.srtt(),
            rto: self.rtt.rto(),
            mtu: self.mtu,
            pending: self.channels.pending(),
            stats: self.stats,
        }
    }
}

/// Move `batch` into `out` as one datagram, merging when it holds several
fn flush_batch(batch: &mut Vec<Bytes>, out: &mut Vec<Bytes>) {
    match batch.len() {
        0 => {}
        1 => out.append(batch),
        _ => out.push(
            Packet::Merged {
                packets: std::mem::take(batch),
            }
            .to_bytes(),
        ),
    }
}
