//! End-to-end over real loopback UDP sockets

mod common;

use bytes::Bytes;
use rudp_tokio::{DeliveryMode, NetConfig, NetEvent, NetManager};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_udp_echo_roundtrip() {
    common::init_tracing();

    let mut server = NetManager::bind("127.0.0.1:0", NetConfig::testing().accept_key(common::KEY))
        .await
        .unwrap();
    let mut client = NetManager::bind("127.0.0.1:0", NetConfig::testing())
        .await
        .unwrap();
    let server_addr = server.local_addr();
    let to_server = client.connect(server_addr, common::KEY).unwrap();

    let big: Bytes = (0..5000u32).map(|i| i as u8).collect::<Vec<_>>().into();
    let expected = big.clone();

    let result = timeout(Duration::from_secs(5), async move {
        let mut tick = tokio::time::interval(Duration::from_millis(5));
        let mut echoed = Vec::new();
        loop {
            tick.tick().await;

            for event in server.poll().unwrap() {
                if let NetEvent::Receive { peer, payload, mode } = event {
                    server.send(peer, payload, mode).unwrap();
                }
            }

            for event in client.poll().unwrap() {
                match event {
                    NetEvent::Connected { peer, .. } => {
                        assert_eq!(peer, to_server);
                        client
                            .send(peer, &b"Hello from Client!"[..], DeliveryMode::ReliableOrdered)
                            .unwrap();
                        client.send(peer, big.clone(), DeliveryMode::ReliableOrdered).unwrap();
                    }
                    NetEvent::Receive { payload, .. } => echoed.push(payload),
                    NetEvent::Disconnected { reason, .. } => panic!("disconnected: {reason}"),
                    _ => {}
                }
            }

            if echoed.len() == 2 {
                client.stop();
                return echoed;
            }
        }
    })
    .await
    .expect("echo did not complete in time");

    assert_eq!(result[0], Bytes::from_static(b"Hello from Client!"));
    assert_eq!(result[1], expected);
}

#[tokio::test]
async fn test_listen_on_ephemeral_port() {
    let manager = NetManager::listen(0, NetConfig::default()).await.unwrap();
    assert_ne!(manager.local_addr().port(), 0);
    assert!(manager.is_running());
}
