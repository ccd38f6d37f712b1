//! Handshake, liveness and disconnect behaviour

mod common;

use bytes::Bytes;
use common::{connected_peer, Pair, KEY, STEP};
use rudp_tokio::protocol::{Packet, PROTOCOL_ID};
use rudp_tokio::{
    ConnectionError, DeliveryMode, DisconnectReason, NetConfig, NetError, NetEvent, PeerId,
};
use std::time::Duration;

fn disconnect_of(events: &[NetEvent]) -> Option<(PeerId, DisconnectReason, Bytes)> {
    events.iter().find_map(|event| match event {
        NetEvent::Disconnected {
            peer, reason, data, ..
        } => Some((*peer, *reason, data.clone())),
        _ => None,
    })
}

#[test]
fn test_auto_accept_with_key() {
    let mut pair = Pair::with_seed(1);
    let (to_server, to_client) = pair.connect();

    assert_eq!(pair.client.connected_peers_count(), 1);
    assert_eq!(pair.server.connected_peers_count(), 1);
    assert_eq!(
        pair.client.peer_info(to_server).unwrap().addr,
        pair.server.local_addr()
    );
    assert_eq!(
        pair.server.peer_info(to_client).unwrap().addr,
        pair.client.local_addr()
    );
}

#[test]
fn test_manual_accept_from_event() {
    let mut pair = Pair::new(2, NetConfig::testing(), NetConfig::testing());
    let peer = pair.client.connect(pair.server.local_addr(), KEY).unwrap();
    pair.run(2);

    let request = pair
        .server_events
        .drain(..)
        .find_map(|event| match event {
            NetEvent::ConnectionRequest(request) => Some(request),
            _ => None,
        })
        .expect("connection request event");
    assert_eq!(request.key(), KEY);
    assert_eq!(request.addr(), pair.client.local_addr());

    let accepted = pair.server.accept_if_key(request, KEY).unwrap();
    pair.run(2);

    assert_eq!(connected_peer(&pair.client_events), Some(peer));
    assert_eq!(connected_peer(&pair.server_events), Some(accepted));
}

#[test]
fn test_wrong_key_rejected() {
    let mut pair = Pair::new(3, NetConfig::testing(), NetConfig::testing());
    let peer = pair.client.connect(pair.server.local_addr(), "wrong_key").unwrap();
    pair.run(2);

    let request = pair
        .server_events
        .drain(..)
        .find_map(|event| match event {
            NetEvent::ConnectionRequest(request) => Some(request),
            _ => None,
        })
        .unwrap();
    let err = pair.server.accept_if_key(request, KEY).unwrap_err();
    assert!(matches!(err, NetError::ConnectionRejected));
    pair.run(2);

    let (gone, reason, data) = disconnect_of(&pair.client_events).unwrap();
    assert_eq!(gone, peer);
    assert_eq!(reason, DisconnectReason::ConnectionRejected);
    assert_eq!(data, Bytes::from_static(b"invalid key"));
    assert!(pair.client.peer_info(peer).is_none());
    assert_eq!(pair.server.connected_peers_count(), 0);

    let err = pair
        .client
        .send(peer, &b"late"[..], DeliveryMode::ReliableOrdered)
        .unwrap_err();
    assert!(matches!(err, NetError::ConnectionRejected), "{err}");
}

#[test]
fn test_wrong_key_auto_rejected() {
    let mut pair = Pair::with_seed(4);
    let peer = pair.client.connect(pair.server.local_addr(), "nope").unwrap();
    pair.run(3);

    let (gone, reason, _) = disconnect_of(&pair.client_events).unwrap();
    assert_eq!(gone, peer);
    assert_eq!(reason, DisconnectReason::ConnectionRejected);
    assert!(pair.server_events.is_empty());
}

#[test]
fn test_handshake_times_out_without_listener() {
    let mut pair = Pair::with_seed(5);
    let unbound = "127.0.0.1:1".parse().unwrap();
    let peer = pair.client.connect(unbound, KEY).unwrap();
    let start = pair.now;

    let done = pair.run_until(500, |p| disconnect_of(&p.client_events).is_some());
    assert!(done);
    let (gone, reason, _) = disconnect_of(&pair.client_events).unwrap();
    assert_eq!(gone, peer);
    assert_eq!(reason, DisconnectReason::Timeout);

    let elapsed = pair.now - start;
    let timeout = pair.client.config().connect_timeout;
    assert!(elapsed >= timeout, "gave up after {elapsed:?}");
    assert!(elapsed <= timeout + STEP * 2, "gave up after {elapsed:?}");

    let err = pair
        .client
        .send(peer, &b"late"[..], DeliveryMode::ReliableOrdered)
        .unwrap_err();
    assert!(
        matches!(err, NetError::ConnectionTimeout { timeout_ms } if timeout_ms == timeout.as_millis() as u64),
        "{err}"
    );
}

#[test]
fn test_connect_after_idle_period() {
    let mut pair = Pair::with_seed(13);
    pair.run(2);
    // Nothing polls for longer than the handshake window
    pair.now += pair.client.config().connect_timeout * 3;

    let peer = pair.client.connect(pair.server.local_addr(), KEY).unwrap();
    pair.step();
    assert!(disconnect_of(&pair.client_events).is_none());
    assert_eq!(pair.server.statistics().packets_received, 1);

    let connected = pair.run_until(50, |p| connected_peer(&p.client_events).is_some());
    assert!(connected, "handshake did not complete");
    assert_eq!(connected_peer(&pair.client_events), Some(peer));
}

#[test]
fn test_silent_peer_times_out() {
    let mut pair = Pair::with_seed(6);
    let (_, to_client) = pair.connect();
    pair.run(20);

    pair.network.block(pair.client.local_addr());
    let blocked_at = pair.now;

    let done = pair.run_until(500, |p| disconnect_of(&p.server_events).is_some());
    assert!(done);
    let (gone, reason, _) = disconnect_of(&pair.server_events).unwrap();
    assert_eq!(gone, to_client);
    assert_eq!(reason, DisconnectReason::Timeout);

    // Last packet arrived at most one ping interval before the block
    let config = pair.server.config();
    let elapsed = pair.now - blocked_at;
    assert!(elapsed <= config.disconnect_timeout + STEP * 2, "{elapsed:?}");
    assert!(elapsed + config.ping_interval + STEP >= config.disconnect_timeout, "{elapsed:?}");

    let window = config.disconnect_timeout.as_millis() as u64;
    let err = pair
        .server
        .send(to_client, &b"late"[..], DeliveryMode::Unreliable)
        .unwrap_err();
    assert!(
        matches!(err, NetError::ConnectionTimeout { timeout_ms } if timeout_ms == window),
        "{err}"
    );
    assert!(pair.server.disconnect(to_client).unwrap_err().is_connection_error());
}

#[test]
fn test_local_disconnect_notifies_both_sides() {
    let mut pair = Pair::with_seed(7);
    let (to_server, to_client) = pair.connect();

    pair.client.disconnect_with(to_server, b"bye").unwrap();
    assert!(pair.client.peer_info(to_server).is_none());
    pair.step();

    let (gone, reason, _) = disconnect_of(&pair.client_events).unwrap();
    assert_eq!(gone, to_server);
    assert_eq!(reason, DisconnectReason::DisconnectPeerCalled);

    let (gone, reason, data) = disconnect_of(&pair.server_events).unwrap();
    assert_eq!(gone, to_client);
    assert_eq!(reason, DisconnectReason::RemoteConnectionClose);
    assert_eq!(data, Bytes::from_static(b"bye"));

    let err = pair
        .client
        .send(to_server, &b"late"[..], DeliveryMode::ReliableOrdered)
        .unwrap_err();
    assert!(matches!(
        err,
        NetError::Connection {
            kind: ConnectionError::NotConnected
        }
    ));
}

#[test]
fn test_new_connection_id_replaces_peer() {
    let mut pair = Pair::with_seed(8);
    let (_, to_client) = pair.connect();

    let request = Packet::ConnectRequest {
        protocol_id: PROTOCOL_ID,
        connection_id: 0xDEAD_BEEF,
        key: KEY.to_string(),
    };
    pair.network
        .inject(pair.client.local_addr(), pair.server.local_addr(), request.to_bytes());
    pair.step();

    let (gone, reason, _) = disconnect_of(&pair.server_events).unwrap();
    assert_eq!(gone, to_client);
    assert_eq!(reason, DisconnectReason::Reconnect);
    let replacement = connected_peer(&pair.server_events).unwrap();
    assert_ne!(replacement, to_client);
    assert_eq!(pair.server.connected_peers_count(), 1);
}

#[test]
fn test_connection_limit() {
    let config = NetConfig::testing().accept_key(KEY).max_connections(1);
    let mut pair = Pair::new(9, config, NetConfig::testing());
    pair.connect();

    let network = pair.network.clone();
    let mut late = rudp_tokio::NetManager::with_transport(network.bind_any().unwrap(), NetConfig::testing()).unwrap();
    let peer = late.connect(pair.server.local_addr(), KEY).unwrap();

    let mut late_events = Vec::new();
    for _ in 0..5 {
        pair.step();
        late_events.extend(late.poll_at(pair.now).unwrap());
    }

    let (gone, reason, data) = disconnect_of(&late_events).unwrap();
    assert_eq!(gone, peer);
    assert_eq!(reason, DisconnectReason::ConnectionRejected);
    assert_eq!(data, Bytes::from_static(b"server full"));
    assert_eq!(pair.server.connected_peers_count(), 1);
}

#[test]
fn test_unconnected_messages() {
    let mut pair = Pair::new(
        10,
        NetConfig::testing().unconnected_messages(true),
        NetConfig::testing(),
    );
    pair.client
        .send_unconnected(pair.server.local_addr(), &b"discovery"[..])
        .unwrap();
    pair.step();

    let got = pair.server_events.iter().find_map(|event| match event {
        NetEvent::ReceiveUnconnected { addr, payload } => Some((*addr, payload.clone())),
        _ => None,
    });
    assert_eq!(
        got,
        Some((pair.client.local_addr(), Bytes::from_static(b"discovery")))
    );
}

#[test]
fn test_latency_update_after_ping() {
    let mut pair = Pair::with_seed(11);
    let (to_server, _) = pair.connect();
    let interval = pair.client.config().ping_interval;
    pair.run((interval.as_millis() / STEP.as_millis()) as usize + 3);

    let rtt = pair.client_events.iter().find_map(|event| match event {
        NetEvent::LatencyUpdate { peer, rtt } if *peer == to_server => Some(*rtt),
        _ => None,
    });
    // Ping and pong cross within one poll step on the memory network
    let rtt = rtt.expect("latency update");
    assert!(rtt <= STEP + Duration::from_millis(1));
    assert!(pair.client.peer_info(to_server).unwrap().rtt.is_some());
}

#[tokio::test]
async fn test_send_handle_from_other_task() {
    let mut pair = Pair::with_seed(12);
    let (to_server, _) = pair.connect();
    let handle = pair.client.handle();

    let confirmed = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .send_confirmed(to_server, &b"from task"[..], DeliveryMode::ReliableOrdered)
                .await
        })
    };
    std::thread::spawn(move || {
        handle
            .send(to_server, &b"from thread"[..], DeliveryMode::ReliableOrdered)
            .unwrap();
    })
    .join()
    .unwrap();

    for _ in 0..10 {
        tokio::task::yield_now().await;
        pair.step();
    }
    confirmed.await.unwrap().unwrap();

    let mut got = pair.server_received();
    got.sort();
    assert_eq!(
        got,
        vec![Bytes::from_static(b"from task"), Bytes::from_static(b"from thread")]
    );
}
