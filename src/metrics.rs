//! Traffic counters for peers and managers

use std::fmt::Write as _;
use std::ops::AddAssign;
use std::time::Duration;

/// Counters for one peer or a whole manager.
///
/// Counters only grow; take two snapshots and subtract to measure an interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStatistics {
    /// Datagrams handed to the socket
    pub packets_sent: u64,
    /// Datagrams read from the socket
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Reliable packets sent again after their timer expired
    pub retransmissions: u64,
    /// Inbound data packets discarded as duplicates or stale
    pub duplicates_dropped: u64,
    /// Inbound datagrams that failed to decode
    pub malformed_dropped: u64,
    /// Fragment groups abandoned before every part arrived
    pub assemblies_expired: u64,
}

impl NetStatistics {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Share of sent packets that had to be retransmitted, in percent
    pub fn packet_loss_percent(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 * 100.0 / self.packets_sent as f64
        }
    }

    /// Combined send and receive throughput over `duration`
    pub fn throughput_bps(&self, duration: Duration) -> f64 {
        let secs = duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes_sent + self.bytes_received) as f64 / secs
    }
}

impl AddAssign for NetStatistics {
    fn add_assign(&mut self, other: Self) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.retransmissions += other.retransmissions;
        self.duplicates_dropped += other.duplicates_dropped;
        self.malformed_dropped += other.malformed_dropped;
        self.assemblies_expired += other.assemblies_expired;
    }
}

/// Human-readable multi-line summary
pub fn format_statistics(stats: &NetStatistics) -> String {
    let mut report = String::new();
    let _ = writeln!(
        report,
        "Packets: sent {} / received {}",
        stats.packets_sent, stats.packets_received
    );
    let _ = writeln!(
        report,
        "Bytes: sent {} / received {}",
        stats.bytes_sent, stats.bytes_received
    );
    let _ = writeln!(
        report,
        "Retransmissions: {} ({:.2}% loss)",
        stats.retransmissions,
        stats.packet_loss_percent()
    );
    let _ = write!(
        report,
        "Dropped: {} duplicate, {} malformed, {} expired assemblies",
        stats.duplicates_dropped, stats.malformed_dropped, stats.assemblies_expired
    );
    report
}
