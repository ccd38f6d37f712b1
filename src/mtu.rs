//! Path MTU discovery.
//!
//! Once connected, a peer probes the next larger entry of
//! [`MTU_CANDIDATES`] with a padded datagram of exactly that size. An
//! `MtuOk` reply raises the peer's MTU and the next candidate is tried right
//! away. A candidate that goes unanswered for [`MAX_PROBE_ATTEMPTS`] probes
//! ends discovery at the last confirmed size.

use crate::protocol::MTU_CANDIDATES;

use std::time::{Duration, Instant};

/// Unanswered probes of one size before giving up
pub const MAX_PROBE_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub(crate) struct MtuDiscovery {
    current: usize,
    attempts: u32,
    next_probe: Instant,
    interval: Duration,
    done: bool,
}

impl MtuDiscovery {
    pub(crate) fn new(current: usize, interval: Duration, now: Instant) -> Self {
        Self {
            current,
            attempts: 0,
            next_probe: now,
            interval,
            done: false,
        }
    }

    fn candidate(&self) -> Option<usize> {
        MTU_CANDIDATES.iter().copied().find(|&mtu| mtu > self.current)
    }

    /// Size of the probe to send at `now`, if one is due
    pub(crate) fn poll(&mut self, now: Instant) -> Option<usize> {
        if self.done || now < self.next_probe {
            return None;
        }
        let Some(candidate) = self.candidate() else {
            self.done = true;
            return None;
        };
        if self.attempts >= MAX_PROBE_ATTEMPTS {
            self.done = true;
            return None;
        }
        self.attempts += 1;
        self.next_probe = now + self.interval;
        Some(candidate)
    }

    /// Record a confirmed size, returning the new MTU when it grew
    pub(crate) fn confirm(&mut self, mtu: usize, now: Instant) -> Option<usize> {
        if self.candidate() != Some(mtu) {
            return None;
        }
        self.current = mtu;
        self.attempts = 0;
        self.next_probe = now;
        Some(mtu)
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}
