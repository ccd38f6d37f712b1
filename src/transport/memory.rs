//! In-process datagram network with seeded fault injection.
//!
//! Every [`MemoryTransport`] bound on one [`MemoryNetwork`] can reach every
//! other. Loss, duplication, reordering, partitions and a path MTU are
//! applied when a datagram is sent, using a seeded RNG so test runs are
//! reproducible.

use super::Transport;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

/// Fault model applied to every datagram
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkConditions {
    /// Probability in `[0, 1]` that a datagram is dropped
    pub loss_rate: f64,
    /// Probability in `[0, 1]` that a delivered datagram arrives twice
    pub duplicate_rate: f64,
    /// Deliver queued datagrams in random order
    pub reorder: bool,
    /// Datagrams longer than this are dropped in transit
    pub max_datagram_size: Option<usize>,
}

#[derive(Debug)]
struct NetworkState {
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Bytes)>>,
    conditions: LinkConditions,
    blocked: HashSet<SocketAddr>,
    rng: StdRng,
    next_port: u16,
    delivered: u64,
    dropped: u64,
}

/// Shared in-memory network
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create a lossless network whose faults are driven by `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                inboxes: HashMap::new(),
                conditions: LinkConditions::default(),
                blocked: HashSet::new(),
                rng: StdRng::seed_from_u64(seed),
                next_port: 40000,
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a transport at `addr`
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemoryTransport> {
        let mut state = self.lock();
        if state.inboxes.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        state.inboxes.insert(addr, VecDeque::new());
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
        })
    }

    /// Attach a transport at the next free loopback port
    pub fn bind_any(&self) -> io::Result<MemoryTransport> {
        let addr = {
            let mut state = self.lock();
            loop {
                let port = state.next_port;
                state.next_port = state.next_port.wrapping_add(1).max(1024);
                let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
                if !state.inboxes.contains_key(&addr) {
                    break addr;
                }
            }
        };
        self.bind(addr)
    }

    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.lock().conditions = conditions;
    }

    pub fn set_loss_rate(&self, loss_rate: f64) {
        self.lock().conditions.loss_rate = loss_rate;
    }

    pub fn set_duplicate_rate(&self, duplicate_rate: f64) {
        self.lock().conditions.duplicate_rate = duplicate_rate;
    }

    pub fn set_reorder(&self, reorder: bool) {
        self.lock().conditions.reorder = reorder;
    }

    pub fn set_max_datagram_size(&self, size: Option<usize>) {
        self.lock().conditions.max_datagram_size = size;
    }

    /// Silently drop everything sent to or from `addr`
    pub fn block(&self, addr: SocketAddr) {
        self.lock().blocked.insert(addr);
    }

    pub fn unblock(&self, addr: SocketAddr) {
        self.lock().blocked.remove(&addr);
    }

    /// Place a raw datagram in `to`'s inbox, bypassing the fault model
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, datagram: impl Into<Bytes>) {
        if let Some(inbox) = self.lock().inboxes.get_mut(&to) {
            inbox.push_back((from, datagram.into()));
        }
    }

    /// Datagrams queued for `addr` and not yet read
    pub fn queued(&self, addr: SocketAddr) -> usize {
        self.lock().inboxes.get(&addr).map_or(0, VecDeque::len)
    }

    /// `(delivered, dropped)` datagram counts
    pub fn counters(&self) -> (u64, u64) {
        let state = self.lock();
        (state.delivered, state.dropped)
    }
}

/// One endpoint on a [`MemoryNetwork`]; unbinds on drop
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let mut state = self.network.lock();
        let state = &mut *state;

        if state.blocked.contains(&self.addr) || state.blocked.contains(&target) {
            state.dropped += 1;
            return Ok(buf.len());
        }
        let conditions = state.conditions;
        if conditions.max_datagram_size.is_some_and(|max| buf.len() > max) {
            state.dropped += 1;
            return Ok(buf.len());
        }
        if conditions.loss_rate > 0.0 && state.rng.gen::<f64>() < conditions.loss_rate {
            state.dropped += 1;
            return Ok(buf.len());
        }
        let copies = if conditions.duplicate_rate > 0.0
            && state.rng.gen::<f64>() < conditions.duplicate_rate
        {
            2
        } else {
            1
        };

        // Unbound destinations swallow datagrams like real UDP
        let Some(inbox) = state.inboxes.get_mut(&target) else {
            state.dropped += 1;
            return Ok(buf.len());
        };
        let datagram = Bytes::copy_from_slice(buf);
        for _ in 0..copies {
            inbox.push_back((self.addr, datagram.clone()));
        }
        state.delivered += copies;
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut state = self.network.lock();
        let state = &mut *state;
        let reorder = state.conditions.reorder;

        let inbox = state
            .inboxes
            .get_mut(&self.addr)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let next = if reorder && inbox.len() > 1 {
            let index = state.rng.gen_range(0..inbox.len());
            inbox.remove(index)
        } else {
            inbox.pop_front()
        };
        let Some((from, datagram)) = next else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.lock().inboxes.remove(&self.addr);
    }
}
