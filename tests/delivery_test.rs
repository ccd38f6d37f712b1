//! Delivery guarantees of each mode over the in-memory network

mod common;

use bytes::Bytes;
use common::{number, numbered, received_with_mode, Pair};
use rudp_tokio::protocol::{DataPacket, Packet};
use rudp_tokio::{DeliveryMode, NetConfig, NetError, NetEvent};

#[test]
fn test_hello_then_numbers() {
    let mut pair = Pair::with_seed(1);
    let (server, _) = pair.connect();

    pair.client
        .send(server, &b"Hello from Client!"[..], DeliveryMode::ReliableOrdered)
        .unwrap();
    for value in [100i32, 200, 300, 400, 500] {
        pair.client
            .send(server, value.to_le_bytes().to_vec(), DeliveryMode::ReliableUnordered)
            .unwrap();
    }
    pair.client
        .send(server, &b"after"[..], DeliveryMode::ReliableOrdered)
        .unwrap();
    pair.run(10);

    let ordered = received_with_mode(&pair.server_events, DeliveryMode::ReliableOrdered);
    assert_eq!(
        ordered,
        vec![Bytes::from_static(b"Hello from Client!"), Bytes::from_static(b"after")]
    );

    let mut numbers: Vec<i32> = received_with_mode(&pair.server_events, DeliveryMode::ReliableUnordered)
        .iter()
        .map(|p| i32::from_le_bytes(p[..4].try_into().unwrap()))
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![100, 200, 300, 400, 500]);
}

#[test]
fn test_every_mode_delivers_under_ideal_network() {
    let mut pair = Pair::with_seed(2);
    let (server, _) = pair.connect();

    for mode in DeliveryMode::ALL {
        pair.client
            .send(server, format!("via {mode}").into_bytes(), mode)
            .unwrap();
    }
    pair.run(5);

    for mode in DeliveryMode::ALL {
        let got = received_with_mode(&pair.server_events, mode);
        assert_eq!(got, vec![Bytes::from(format!("via {mode}"))], "mode {mode}");
    }
}

#[test]
fn test_reliable_ordered_survives_loss_and_reordering() {
    let mut pair = Pair::with_seed(3);
    let (server, _) = pair.connect();

    pair.network.set_loss_rate(0.1);
    pair.network.set_reorder(true);

    for i in 0..200 {
        pair.client
            .send(server, numbered(i), DeliveryMode::ReliableOrdered)
            .unwrap();
    }
    let done = pair.run_until(3000, |p| p.server_received().len() >= 200);
    assert!(done, "only {} delivered", pair.server_received().len());

    let order: Vec<u32> = pair.server_received().iter().map(number).collect();
    assert_eq!(order, (0..200).collect::<Vec<_>>());
    assert!(pair.client.statistics().retransmissions > 0);
}

#[test]
fn test_reliable_unordered_exactly_once_with_duplication() {
    let mut pair = Pair::with_seed(4);
    let (server, _) = pair.connect();

    pair.network.set_duplicate_rate(1.0);
    pair.network.set_reorder(true);

    for i in 0..100 {
        pair.client
            .send(server, numbered(i), DeliveryMode::ReliableUnordered)
            .unwrap();
    }
    pair.run(50);

    let mut got: Vec<u32> = pair.server_received().iter().map(number).collect();
    got.sort_unstable();
    assert_eq!(got, (0..100).collect::<Vec<_>>());
    assert!(pair.server.statistics().duplicates_dropped >= 100);
}

#[test]
fn test_injected_duplicate_not_redelivered() {
    let mut pair = Pair::with_seed(5);
    let (server, _) = pair.connect();

    pair.client
        .send(server, &b"once"[..], DeliveryMode::ReliableOrdered)
        .unwrap();
    pair.run(5);
    assert_eq!(pair.server_received().len(), 1);

    let replay = Packet::Data(DataPacket {
        mode: DeliveryMode::ReliableOrdered,
        sequence: 0,
        fragment: None,
        payload: Bytes::from_static(b"once"),
    });
    for _ in 0..3 {
        pair.network
            .inject(pair.client.local_addr(), pair.server.local_addr(), replay.to_bytes());
    }
    pair.run(5);
    assert_eq!(pair.server_received().len(), 1);
}

#[test]
fn test_sequenced_discards_stale() {
    let mut pair = Pair::with_seed(6);
    pair.connect();
    let (client_addr, server_addr) = (pair.client.local_addr(), pair.server.local_addr());

    for sequence in [5u16, 3, 4, 6] {
        let packet = Packet::Data(DataPacket {
            mode: DeliveryMode::Sequenced,
            sequence,
            fragment: None,
            payload: Bytes::copy_from_slice(&sequence.to_le_bytes()),
        });
        pair.network.inject(client_addr, server_addr, packet.to_bytes());
    }
    pair.step();

    let got: Vec<u16> = pair
        .server_received()
        .iter()
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .collect();
    assert_eq!(got, vec![5, 6]);
}

#[test]
fn test_sequenced_is_monotonic_under_reordering() {
    let mut pair = Pair::with_seed(7);
    let (server, _) = pair.connect();
    pair.network.set_reorder(true);

    for i in 0..50 {
        pair.client.send(server, numbered(i), DeliveryMode::Sequenced).unwrap();
    }
    pair.run(5);

    let got: Vec<u32> = pair.server_received().iter().map(number).collect();
    assert!(!got.is_empty());
    assert!(got.len() <= 50);
    assert!(got.windows(2).all(|w| w[0] < w[1]), "not increasing: {got:?}");
}

#[test]
fn test_reliable_sequenced_delivers_newest() {
    let mut pair = Pair::with_seed(8);
    let (server, _) = pair.connect();
    pair.network.set_loss_rate(0.2);

    for i in 0..10 {
        pair.client
            .send(server, numbered(i), DeliveryMode::ReliableSequenced)
            .unwrap();
    }
    let done = pair.run_until(500, |p| p.server_received().iter().any(|b| number(b) == 9));
    assert!(done);

    let got: Vec<u32> = pair.server_received().iter().map(number).collect();
    assert!(got.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(got.last(), Some(&9));
    // The newest packet is eventually acknowledged and nothing is left to resend
    pair.network.set_loss_rate(0.0);
    pair.run(50);
    assert_eq!(pair.client.peer_info(server).unwrap().pending, 0);
}

#[test]
fn test_unreliable_at_most_once_per_send() {
    let mut pair = Pair::with_seed(9);
    let (server, _) = pair.connect();
    pair.network.set_loss_rate(0.5);

    for i in 0..40 {
        pair.client.send(server, numbered(i), DeliveryMode::Unreliable).unwrap();
    }
    pair.run(5);

    let got = pair.server_received();
    assert!(got.len() < 40);
    assert!(got.iter().all(|b| number(b) < 40));
}

#[test]
fn test_fragmented_message_roundtrip() {
    let mut pair = Pair::with_seed(10);
    let (server, _) = pair.connect();
    pair.network.set_loss_rate(0.1);
    pair.network.set_reorder(true);

    let big: Bytes = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect::<Vec<_>>().into();
    pair.client
        .send(server, big.clone(), DeliveryMode::ReliableOrdered)
        .unwrap();
    pair.client
        .send(server, big.slice(..3000), DeliveryMode::ReliableUnordered)
        .unwrap();

    let done = pair.run_until(1000, |p| p.server_received().len() >= 2);
    assert!(done);
    assert_eq!(
        received_with_mode(&pair.server_events, DeliveryMode::ReliableOrdered),
        vec![big.clone()]
    );
    assert_eq!(
        received_with_mode(&pair.server_events, DeliveryMode::ReliableUnordered),
        vec![big.slice(..3000)]
    );
}

#[test]
fn test_oversized_unfragmentable_send_rejected() {
    let mut pair = Pair::with_seed(11);
    let (server, _) = pair.connect();
    let big = vec![0u8; 5000];

    for mode in [DeliveryMode::Unreliable, DeliveryMode::Sequenced, DeliveryMode::ReliableSequenced] {
        let err = pair.client.send(server, big.clone(), mode).unwrap_err();
        assert!(matches!(err, NetError::Buffer { .. }), "{mode}: {err}");
    }
}

#[test]
fn test_send_to_all_reaches_every_client() {
    let network = rudp_tokio::transport::memory::MemoryNetwork::new(12);
    let mut server = rudp_tokio::NetManager::with_transport(
        network.bind_any().unwrap(),
        NetConfig::testing().accept_key(common::KEY),
    )
    .unwrap();
    let mut clients: Vec<_> = (0..3)
        .map(|_| rudp_tokio::NetManager::with_transport(network.bind_any().unwrap(), NetConfig::testing()).unwrap())
        .collect();

    let mut now = std::time::Instant::now();
    for client in &mut clients {
        client.connect(server.local_addr(), common::KEY).unwrap();
    }
    let mut inboxes: Vec<Vec<NetEvent>> = clients.iter().map(|_| Vec::new()).collect();
    for step in 0..20 {
        now += common::STEP;
        if step == 5 {
            assert_eq!(server.connected_peers_count(), 3);
            assert_eq!(
                server.send_to_all(&b"broadcast"[..], DeliveryMode::ReliableOrdered).unwrap(),
                3
            );
        }
        server.poll_at(now).unwrap();
        for (client, inbox) in clients.iter_mut().zip(&mut inboxes) {
            inbox.extend(client.poll_at(now).unwrap());
        }
    }

    for inbox in &inboxes {
        assert_eq!(common::received(inbox), vec![Bytes::from_static(b"broadcast")]);
    }
}

#[test]
fn test_statistics_track_traffic() {
    let mut pair = Pair::with_seed(13);
    let (server, _) = pair.connect();
    pair.client
        .send(server, &b"count me"[..], DeliveryMode::ReliableOrdered)
        .unwrap();
    pair.run(5);

    let stats = pair.client.statistics();
    assert!(stats.packets_sent >= 2);
    assert!(stats.bytes_sent > 0);
    let peer = pair.client.peer_info(server).unwrap();
    assert!(peer.stats.packets_received > 0);
    assert!(rudp_tokio::format_statistics(&stats).contains("Packets: sent"));
    assert!(pair
        .server_events
        .iter()
        .all(|e| !matches!(e, NetEvent::NetworkError { .. })));
}
