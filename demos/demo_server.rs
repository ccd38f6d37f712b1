//! Demo server: accepts clients presenting `test_key`, logs what they send and
//! answers with one message per delivery mode.
//!
//! Run with `cargo run --example demo_server`, then start `demo_client`.

#[path = "messages.rs"]
mod messages;

use messages::DemoMessage;
use rudp_tokio::{format_statistics, DeliveryMode, NetConfig, NetEvent, NetManager, PeerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PORT: u16 = 9050;
const KEY: &str = "test_key";

fn reply_burst() -> Vec<(DemoMessage, DeliveryMode)> {
    let mut burst = vec![
        (
            DemoMessage::Text("Hello from Server!".into()),
            DeliveryMode::Unreliable,
        ),
        (
            DemoMessage::Text("Server message over an ordered channel".into()),
            DeliveryMode::ReliableOrdered,
        ),
        (
            DemoMessage::Numbers((1..=5).map(|i| i * 1000).collect()),
            DeliveryMode::ReliableUnordered,
        ),
    ];
    for i in 1..=3 {
        burst.push((DemoMessage::Text(format!("Sequenced msg {i}")), DeliveryMode::Sequenced));
    }
    for i in 1..=3 {
        burst.push((
            DemoMessage::Text(format!("ReliableSequenced msg {i}")),
            DeliveryMode::ReliableSequenced,
        ));
    }
    burst
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = NetConfig::default().accept_key(KEY).max_connections(8);
    let update_interval = config.update_interval;
    let mut server = NetManager::listen(PORT, config).await?;
    info!(addr = %server.local_addr(), "Demo server listening");

    // Peers that should get the reply burst once this instant passes
    let mut scheduled: HashMap<PeerId, Instant> = HashMap::new();
    let mut tick = tokio::time::interval(update_interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        for event in server.poll()? {
            match event {
                NetEvent::Connected { peer, addr } => {
                    info!(%peer, %addr, "Client connected");
                    scheduled.insert(peer, Instant::now() + Duration::from_millis(500));
                }
                NetEvent::Disconnected { peer, reason, .. } => {
                    info!(%peer, %reason, "Client disconnected");
                    scheduled.remove(&peer);
                }
                NetEvent::Receive { peer, payload, mode } => match DemoMessage::decode(payload) {
                    Ok(DemoMessage::Start) => {
                        scheduled.insert(peer, Instant::now());
                    }
                    Ok(DemoMessage::Blob(data)) => info!(%peer, %mode, size = data.len(), "Received blob"),
                    Ok(message) => info!(%peer, %mode, ?message, "Received"),
                    Err(e) => warn!(%peer, error = %e, "Undecodable message"),
                },
                NetEvent::NetworkError { error, .. } => warn!(error = %error, "Network error"),
                _ => {}
            }
        }

        let now = Instant::now();
        let due: Vec<PeerId> = scheduled
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in due {
            scheduled.remove(&peer);
            for (message, mode) in reply_burst() {
                server.send(peer, message.encode(), mode)?;
            }
            info!(%peer, "Sent reply burst");
        }
    }

    info!("\n{}", format_statistics(&server.statistics()));
    server.stop();
    Ok(())
}
