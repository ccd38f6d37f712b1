//! Demo client: connects to `demo_server`, sends one message of each kind and
//! logs the server's replies for a few seconds.

#[path = "messages.rs"]
mod messages;

use bytes::Bytes;
use messages::DemoMessage;
use rudp_tokio::{format_statistics, DeliveryMode, NetConfig, NetEvent, NetManager};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const KEY: &str = "test_key";
const RUN_FOR: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9050".to_string())
        .parse()?;

    let config = NetConfig::default();
    let update_interval = config.update_interval;
    let mut client = NetManager::listen(0, config).await?;
    let server = client.connect(server_addr, KEY)?;
    info!(%server_addr, "Connecting");

    let mut tick = tokio::time::interval(update_interval);
    let mut deadline = None;

    loop {
        tick.tick().await;

        for event in client.poll()? {
            match event {
                NetEvent::Connected { peer, .. } => {
                    info!("Connected to server");
                    let outgoing = [
                        (DemoMessage::Text("Hello from Client!".into()), DeliveryMode::ReliableOrdered),
                        (
                            DemoMessage::Numbers(vec![100, 200, 300, 400, 500]),
                            DeliveryMode::ReliableUnordered,
                        ),
                        (
                            DemoMessage::Blob(Bytes::from(vec![0x42u8; 5000])),
                            DeliveryMode::ReliableOrdered,
                        ),
                        (DemoMessage::Start, DeliveryMode::ReliableOrdered),
                    ];
                    for (message, mode) in outgoing {
                        client.send(peer, message.encode(), mode)?;
                    }
                    deadline = Some(Instant::now() + RUN_FOR);
                }
                NetEvent::Receive { payload, mode, .. } => match DemoMessage::decode(payload) {
                    Ok(message) => info!(%mode, ?message, "Received"),
                    Err(e) => warn!(error = %e, "Undecodable message"),
                },
                NetEvent::LatencyUpdate { rtt, .. } => info!(rtt_ms = rtt.as_millis() as u64, "Latency"),
                NetEvent::Disconnected { peer, reason, .. } if peer == server => {
                    warn!(%reason, "Disconnected from server");
                    return Ok(());
                }
                _ => {}
            }
        }

        if deadline.is_some_and(|at| Instant::now() >= at) {
            break;
        }
    }

    info!("\n{}", format_statistics(&client.statistics()));
    client.stop();
    Ok(())
}
