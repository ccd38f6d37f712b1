//! Configuration types for the transport

use crate::error::{NetError, Result};
use crate::protocol::{CHECKSUM_SIZE, FRAGMENTED_HEADER_SIZE, MAX_DATAGRAM_SIZE};
use std::time::Duration;

/// Transport configuration builder
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Maximum datagram size in bytes, and the starting point for MTU discovery
    pub mtu: usize,
    /// Probe larger path MTUs once connected
    pub mtu_discovery: bool,
    /// Period between MTU probes
    pub mtu_probe_interval: Duration,
    /// Pack small outgoing packets for one peer into shared datagrams
    pub merge_packets: bool,
    /// Append and verify a CRC-32 trailer on every datagram. Both ends must agree.
    pub checksum: bool,
    /// Suggested cadence between `poll()` calls
    pub update_interval: Duration,
    /// Keep-alive ping period
    pub ping_interval: Duration,
    /// Peer is dropped when nothing is received for this long
    pub disconnect_timeout: Duration,
    /// Handshake must complete within this window
    pub connect_timeout: Duration,
    /// Resend period for unanswered connect requests
    pub reconnect_delay: Duration,
    /// Retransmission timeout before any RTT sample exists
    pub initial_rto: Duration,
    /// Lower RTO clamp
    pub min_rto: Duration,
    /// Upper RTO clamp, also the backoff cap
    pub max_rto: Duration,
    /// Retransmissions of a single packet before the peer is considered lost
    pub max_retries: u32,
    /// An incomplete fragment group is dropped when no part arrived for this long
    pub fragment_timeout: Duration,
    /// Maximum fragments per message
    pub max_fragments: u16,
    /// Maximum connected peers admitted by a listener
    pub max_connections: usize,
    /// Auto-resolve incoming requests against this key
    pub accept_key: Option<String>,
    /// Deliver datagrams from unknown addresses as unconnected messages
    pub unconnected_messages: bool,
    /// Scratch buffer size for socket reads
    pub recv_buffer_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            mtu: 1024,
            mtu_discovery: false,
            mtu_probe_interval: Duration::from_millis(1000),
            merge_packets: true,
            checksum: false,
            update_interval: Duration::from_millis(15),
            ping_interval: Duration::from_millis(1000),
            disconnect_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(500),
            initial_rto: Duration::from_millis(200),
            min_rto: Duration::from_millis(30),
            max_rto: Duration::from_millis(2000),
            max_retries: 10,
            fragment_timeout: Duration::from_secs(30),
            max_fragments: 1024,
            max_connections: 64,
            accept_key: None,
            unconnected_messages: false,
            recv_buffer_size: 65536,
        }
    }
}

impl NetConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU (maximum datagram size)
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Enable path MTU probing
    pub fn mtu_discovery(mut self, enabled: bool) -> Self {
        self.mtu_discovery = enabled;
        self
    }

    /// Set the period between MTU probes
    pub fn mtu_probe_interval(mut self, interval: Duration) -> Self {
        self.mtu_probe_interval = interval;
        self
    }

    /// Enable or disable packet merging
    pub fn merge_packets(mut self, enabled: bool) -> Self {
        self.merge_packets = enabled;
        self
    }

    /// Enable CRC-32 datagram checksums
    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    /// Set the suggested poll cadence
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Set keep-alive ping period
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set liveness timeout
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set connect request resend period
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set RTO bounds and the initial RTO
    pub fn rto(mut self, initial: Duration, min: Duration, max: Duration) -> Self {
        self.initial_rto = initial;
        self.min_rto = min;
        self.max_rto = max;
        self
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set incomplete reassembly lifetime
    pub fn fragment_timeout(mut self, timeout: Duration) -> Self {
        self.fragment_timeout = timeout;
        self
    }

    /// Set the per-message fragment limit
    pub fn max_fragments(mut self, count: u16) -> Self {
        self.max_fragments = count;
        self
    }

    /// Set the listener admission limit
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// Auto-accept requests carrying this key, reject the rest
    pub fn accept_key(mut self, key: impl Into<String>) -> Self {
        self.accept_key = Some(key.into());
        self
    }

    /// Enable unconnected message delivery
    pub fn unconnected_messages(mut self, enabled: bool) -> Self {
        self.unconnected_messages = enabled;
        self
    }

    /// Set receive scratch buffer size
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Bytes added to every datagram after framing
    pub(crate) fn checksum_overhead(&self) -> usize {
        if self.checksum {
            CHECKSUM_SIZE
        } else {
            0
        }
    }

    /// Room for one framed packet in a datagram of `mtu` bytes
    pub(crate) fn packet_budget(&self, mtu: usize) -> usize {
        mtu - self.checksum_overhead()
    }

    /// Largest payload that fits one fragment at `mtu`
    pub(crate) fn fragment_payload_size(&self, mtu: usize) -> usize {
        self.packet_budget(mtu) - FRAGMENTED_HEADER_SIZE
    }

    /// Longest a reliable packet can stay unacknowledged before its peer is
    /// dropped
    pub(crate) fn retransmit_span(&self) -> Duration {
        self.max_rto.saturating_mul(self.max_retries.saturating_add(1))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 64 || self.mtu > MAX_DATAGRAM_SIZE {
            return Err(NetError::config(format!(
                "MTU must be between 64 and {MAX_DATAGRAM_SIZE}"
            )));
        }

        if self.recv_buffer_size < self.mtu {
            return Err(NetError::config("Receive buffer must hold at least one MTU"));
        }

        if self.ping_interval.is_zero()
            || self.disconnect_timeout.is_zero()
            || self.connect_timeout.is_zero()
            || self.reconnect_delay.is_zero()
            || self.fragment_timeout.is_zero()
        {
            return Err(NetError::config("Timeouts and intervals must be non-zero"));
        }

        if self.ping_interval >= self.disconnect_timeout {
            return Err(NetError::config(
                "Ping interval must be shorter than the disconnect timeout",
            ));
        }

        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(NetError::config("RTO bounds must satisfy 0 < min <= max"));
        }

        if self.max_retries == 0 {
            return Err(NetError::config("Max retries must be greater than 0"));
        }

        // A reliable fragment group can stall for a whole retransmit span
        if self.fragment_timeout < self.retransmit_span() {
            return Err(NetError::config(format!(
                "Fragment timeout must be at least max_rto * (max_retries + 1) = {:?}",
                self.retransmit_span()
            )));
        }

        if self.mtu_discovery && self.mtu_probe_interval.is_zero() {
            return Err(NetError::config("MTU probe interval must be non-zero"));
        }

        if self.max_fragments == 0 {
            return Err(NetError::config("Max fragments must be greater than 0"));
        }

        Ok(())
    }
}

/// Preset configurations for common use cases
impl NetConfig {
    /// Low-latency local network
    pub fn lan() -> Self {
        Self::default()
            .mtu(1400)
            .update_interval(Duration::from_millis(10))
            .rto(
                Duration::from_millis(50),
                Duration::from_millis(10),
                Duration::from_millis(500),
            )
    }

    /// Interactive traffic over the internet
    pub fn realtime() -> Self {
        Self::default()
            .mtu(1200)
            .update_interval(Duration::from_millis(10))
            .ping_interval(Duration::from_millis(500))
            .disconnect_timeout(Duration::from_secs(3))
            .connect_timeout(Duration::from_secs(3))
    }

    /// Short timeouts for tests that drive the clock by hand
    pub fn testing() -> Self {
        Self::default()
            .ping_interval(Duration::from_millis(100))
            .disconnect_timeout(Duration::from_millis(1000))
            .connect_timeout(Duration::from_millis(1000))
            .reconnect_delay(Duration::from_millis(100))
            .rto(
                Duration::from_millis(50),
                Duration::from_millis(20),
                Duration::from_millis(200),
            )
            .fragment_timeout(Duration::from_millis(3000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(NetConfig::default().validate().is_ok());
        assert!(NetConfig::lan().validate().is_ok());
        assert!(NetConfig::realtime().validate().is_ok());
        assert!(NetConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(NetConfig::new().mtu(32).validate().is_err());
        assert!(NetConfig::new().max_retries(0).validate().is_err());
        assert!(NetConfig::new()
            .ping_interval(Duration::from_secs(10))
            .validate()
            .is_err());
        assert!(NetConfig::new()
            .rto(
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_millis(200)
            )
            .validate()
            .is_err());
    }

    #[test]
    fn test_builder() {
        let config = NetConfig::new().mtu(600).accept_key("secret").max_connections(2);
        assert_eq!(config.mtu, 600);
        assert_eq!(config.accept_key.as_deref(), Some("secret"));
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.fragment_payload_size(600), 600 - FRAGMENTED_HEADER_SIZE);

        let sealed = config.checksum(true);
        assert_eq!(sealed.packet_budget(600), 600 - CHECKSUM_SIZE);
    }

    #[test]
    fn test_fragment_timeout_covers_retransmit_span() {
        let config = NetConfig::new()
            .rto(
                Duration::from_millis(100),
                Duration::from_millis(50),
                Duration::from_secs(1),
            )
            .max_retries(4);
        assert_eq!(config.retransmit_span(), Duration::from_secs(5));
        assert!(config.clone().fragment_timeout(Duration::from_secs(4)).validate().is_err());
        assert!(config.fragment_timeout(Duration::from_secs(5)).validate().is_ok());
    }
}
