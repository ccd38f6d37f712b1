//! Reliability engine: RTT estimation, retransmission timers, and the
//! receive-side acknowledgement window.

use crate::protocol::{seq_diff, AckPacket, DeliveryMode, SeqNum, WINDOW_SIZE};

use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Smoothed round-trip time estimator.
///
/// SRTT and RTTVAR follow the usual 1/8 and 1/4 moving averages and the
/// retransmission timeout is `SRTT + 4 * RTTVAR`, clamped to the configured
/// bounds.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt_us: u64,
    rttvar_us: u64,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    samples: u64,
}

impl RttEstimator {
    /// Create an estimator with no samples
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt_us: 0,
            rttvar_us: 0,
            rto: initial_rto.clamp(min_rto, max_rto),
            min_rto,
            max_rto,
            samples: 0,
        }
    }

    /// Feed one measured round trip
    pub fn update(&mut self, sample: Duration) {
        let rtt = (sample.as_micros() as u64).max(1);

        if self.samples == 0 {
            self.srtt_us = rtt;
            self.rttvar_us = rtt / 2;
        } else {
            let delta = self.srtt_us.abs_diff(rtt);
            self.rttvar_us = (3 * self.rttvar_us + delta) / 4;
            self.srtt_us = ((7 * self.srtt_us + rtt) / 8).max(1);
        }
        self.samples += 1;

        let rto = Duration::from_micros(self.srtt_us + 4 * self.rttvar_us);
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed RTT, if any sample was taken
    pub fn srtt(&self) -> Option<Duration> {
        (self.samples > 0).then(|| Duration::from_micros(self.srtt_us))
    }

    /// RTT variance estimate
    pub fn rttvar(&self) -> Duration {
        Duration::from_micros(self.rttvar_us)
    }

    /// Number of samples taken
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// A reliable packet has been retransmitted `max_retries` times without an ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub sequence: SeqNum,
    pub attempts: u32,
}

/// Result of acknowledging a tracked packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acked {
    /// Only packets acknowledged on their first transmission yield a sample
    pub rtt_sample: Option<Duration>,
}

#[derive(Debug)]
struct PendingEntry {
    datagram: Bytes,
    sent_at: Instant,
    retries: u32,
    rto: Duration,
    token: u64,
}

/// Packets awaiting acknowledgement, with their resend deadlines kept in a
/// min-heap so each poll only touches what is due.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    entries: HashMap<SeqNum, PendingEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, u64, SeqNum)>>,
    next_token: u64,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet that was just transmitted for the first time
    pub fn track(&mut self, sequence: SeqNum, datagram: Bytes, now: Instant, rto: Duration) {
        let token = self.issue_token();
        self.deadlines.push(Reverse((now + rto, token, sequence)));
        self.entries.insert(
            sequence,
            PendingEntry {
                datagram,
                sent_at: now,
                retries: 0,
                rto,
                token,
            },
        );
    }

    /// Remove an acknowledged packet
    pub fn acknowledge(&mut self, sequence: SeqNum, now: Instant) -> Option<Acked> {
        let entry = self.entries.remove(&sequence)?;
        let rtt_sample = (entry.retries == 0).then(|| now.saturating_duration_since(entry.sent_at));
        Some(Acked { rtt_sample })
    }

    /// Collect datagrams whose resend deadline has passed.
    ///
    /// Each resend doubles the entry's timeout up to `max_rto`. Fails once a
    /// due packet has already been retransmitted `max_retries` times.
    pub fn poll_due(
        &mut self,
        now: Instant,
        max_rto: Duration,
        max_retries: u32,
        out: &mut Vec<Bytes>,
    ) -> Result<usize, RetriesExhausted> {
        let mut resent = 0;

        while let Some(Reverse((due, token, sequence))) = self.deadlines.peek().copied() {
            if due > now {
                break;
            }
            self.deadlines.pop();

            let Some(entry) = self.entries.get_mut(&sequence) else {
                continue;
            };
            if entry.token != token {
                continue;
            }
            if entry.retries >= max_retries {
                return Err(RetriesExhausted {
                    sequence,
                    attempts: entry.retries + 1,
                });
            }

            entry.retries += 1;
            entry.rto = (entry.rto * 2).min(max_rto);
            self.next_token += 1;
            entry.token = self.next_token;
            self.deadlines
                .push(Reverse((now + entry.rto, entry.token, sequence)));
            out.push(entry.datagram.clone());
            resent += 1;
        }

        Ok(resent)
    }

    /// Whether a sequence is still awaiting its ack
    pub fn contains(&self, sequence: SeqNum) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Number of unacknowledged packets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything, cancelling all pending resends
    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Outcome of recording an inbound reliable sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// First arrival
    New,
    /// Already received, acknowledged again
    Duplicate,
    /// Too far ahead of the receive window, dropped without an ack
    OutOfWindow,
}

/// Receive-side acknowledgement state of one reliable channel.
///
/// Tracks which sequences in `[start, start + WINDOW_SIZE)` arrived, in a ring
/// of bits indexed by `seq % WINDOW_SIZE`. The window slides forward only when
/// a sequence beyond its end arrives; everything it slides past is known to be
/// acknowledged at the sender.
#[derive(Debug, Default)]
pub struct AckWindow {
    start: SeqNum,
    bits: u64,
    ack_pending: bool,
}

impl AckWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival. `next_expected` is the lowest sequence not yet
    /// received by the channel.
    pub fn record(&mut self, sequence: SeqNum, next_expected: SeqNum) -> Receipt {
        let window = WINDOW_SIZE as i16;
        let ahead = seq_diff(sequence, next_expected);

        if ahead >= window {
            return Receipt::OutOfWindow;
        }

        if ahead < 0 {
            self.ack_pending = true;
            return Receipt::Duplicate;
        }

        let rel = seq_diff(sequence, self.start);
        if rel >= window {
            let new_start = sequence.wrapping_sub(WINDOW_SIZE - 1);
            self.slide_to(new_start);
        } else if rel < 0 {
            return Receipt::OutOfWindow;
        }

        self.ack_pending = true;
        let bit = 1u64 << (sequence % WINDOW_SIZE);
        if self.bits & bit != 0 {
            return Receipt::Duplicate;
        }
        self.bits |= bit;
        Receipt::New
    }

    /// Whether `sequence` is inside the window and was received
    pub fn is_received(&self, sequence: SeqNum) -> bool {
        let rel = seq_diff(sequence, self.start);
        rel >= 0 && rel < WINDOW_SIZE as i16 && self.bits & (1u64 << (sequence % WINDOW_SIZE)) != 0
    }

    /// Produce an ack if anything arrived since the last one
    pub fn take_ack(&mut self, mode: DeliveryMode) -> Option<AckPacket> {
        if !self.ack_pending {
            return None;
        }
        self.ack_pending = false;
        Some(AckPacket {
            mode,
            window_start: self.start,
            mask: self.bits.rotate_right((self.start % WINDOW_SIZE) as u32),
        })
    }

    pub fn start(&self) -> SeqNum {
        self.start
    }

    fn slide_to(&mut self, new_start: SeqNum) {
        let distance = new_start.wrapping_sub(self.start);
        if distance >= WINDOW_SIZE {
            self.bits = 0;
        } else {
            let mut seq = self.start;
            while seq != new_start {
                self.bits &= !(1u64 << (seq % WINDOW_SIZE));
                seq = seq.wrapping_add(1);
            }
        }
        self.start = new_start;
    }
}
