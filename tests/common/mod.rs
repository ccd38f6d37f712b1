//! Shared test helpers: two managers on one in-memory network, driven by a
//! manual clock.

#![allow(dead_code)]

use bytes::Bytes;
use rudp_tokio::transport::memory::{MemoryNetwork, MemoryTransport};
use rudp_tokio::{DeliveryMode, NetConfig, NetEvent, NetManager, PeerId};
use std::time::{Duration, Instant};

pub type MemManager = NetManager<MemoryTransport>;

pub const KEY: &str = "test_key";
pub const STEP: Duration = Duration::from_millis(10);

/// A server and a client sharing one network and one clock
pub struct Pair {
    pub network: MemoryNetwork,
    pub server: MemManager,
    pub client: MemManager,
    pub now: Instant,
    pub server_events: Vec<NetEvent>,
    pub client_events: Vec<NetEvent>,
}

impl Pair {
    pub fn new(seed: u64, server_config: NetConfig, client_config: NetConfig) -> Self {
        let network = MemoryNetwork::new(seed);
        let server = NetManager::with_transport(network.bind_any().unwrap(), server_config).unwrap();
        let client = NetManager::with_transport(network.bind_any().unwrap(), client_config).unwrap();
        Self {
            network,
            server,
            client,
            now: Instant::now(),
            server_events: Vec::new(),
            client_events: Vec::new(),
        }
    }

    /// Server auto-accepts `KEY`
    pub fn with_seed(seed: u64) -> Self {
        Self::new(seed, NetConfig::testing().accept_key(KEY), NetConfig::testing())
    }

    /// Advance the clock one step and poll both sides
    pub fn step(&mut self) {
        self.now += STEP;
        self.client_events.extend(self.client.poll_at(self.now).unwrap());
        self.server_events.extend(self.server.poll_at(self.now).unwrap());
    }

    pub fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until `done` holds, giving up after `max_steps`
    pub fn run_until(&mut self, max_steps: usize, mut done: impl FnMut(&Pair) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Connect with the shared key; returns (client's id for server, server's id for client)
    pub fn connect(&mut self) -> (PeerId, PeerId) {
        let server_addr = self.server.local_addr();
        let to_server = self.client.connect(server_addr, KEY).unwrap();
        let connected = self.run_until(100, |pair| {
            connected_peer(&pair.client_events).is_some() && connected_peer(&pair.server_events).is_some()
        });
        assert!(connected, "handshake did not complete");

        let to_client = connected_peer(&self.server_events).unwrap();
        assert_eq!(connected_peer(&self.client_events), Some(to_server));
        self.server_events.clear();
        self.client_events.clear();
        (to_server, to_client)
    }

    pub fn server_received(&self) -> Vec<Bytes> {
        received(&self.server_events)
    }

    pub fn client_received(&self) -> Vec<Bytes> {
        received(&self.client_events)
    }
}

pub fn connected_peer(events: &[NetEvent]) -> Option<PeerId> {
    events.iter().find_map(|event| match event {
        NetEvent::Connected { peer, .. } => Some(*peer),
        _ => None,
    })
}

pub fn received(events: &[NetEvent]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|event| match event {
            NetEvent::Receive { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

pub fn received_with_mode(events: &[NetEvent], mode: DeliveryMode) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|event| match event {
            NetEvent::Receive {
                payload, mode: m, ..
            } if *m == mode => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

pub fn numbered(i: u32) -> Bytes {
    Bytes::copy_from_slice(&i.to_le_bytes())
}

pub fn number(payload: &Bytes) -> u32 {
    u32::from_le_bytes(payload[..4].try_into().unwrap())
}

/// Initialize tracing for debugging a failing test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
