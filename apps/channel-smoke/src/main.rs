use std::{sync::Arc, time::Duration};

use channel_core::SessionEvent;
use channel_runtime::{ChannelConfig, SessionEventChannel, activation_hook};
use channel_transport::{LoopbackEndpoint, LoopbackTransport, NetworkStateFlag, SessionExpiryFlag};
use tokio::time::timeout;
use tracing::info;

mod logging;

const SMOKE_TOPIC: &str = "smoke";
const SMOKE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(message) = run().await {
        eprintln!("Smoke run failed: {message}");
        std::process::exit(1);
    }
    println!("Session event channel smoke run passed.");
}

async fn run() -> Result<(), String> {
    let (transport, endpoint) = LoopbackTransport::new();
    let server = tokio::spawn(echo_server(endpoint));

    let channel = SessionEventChannel::spawn(
        ChannelConfig::default(),
        Arc::new(transport),
        Arc::new(SessionExpiryFlag::new()),
        Arc::new(NetworkStateFlag::new()),
        activation_hook(|| async {
            info!("activation handshake accepted");
            Ok(())
        }),
    );

    let mut stream = channel.multiplex(SMOKE_TOPIC);
    channel
        .emit(SessionEvent::new("smoke_ping").with_topic(SMOKE_TOPIC))
        .map_err(|err| err.to_string())?;

    let ack = timeout(SMOKE_TIMEOUT, stream.recv())
        .await
        .map_err(|_| "timed out waiting for the topic acknowledgement".to_owned())?
        .ok_or_else(|| "topic stream closed before the acknowledgement".to_owned())?;
    info!(id = %ack.id, topic = ?ack.topic_id, "received topic acknowledgement");

    stream.unsubscribe();
    channel.close();
    server.abort();
    Ok(())
}

/// Loopback peer standing in for the server: acknowledges topic subscriptions
/// and echoes pings back on their topic.
async fn echo_server(mut endpoint: LoopbackEndpoint) {
    while let Some(mut peer) = endpoint.accept().await {
        info!("server accepted a connection");
        while let Some(event) = peer.sent().await {
            info!(id = %event.id, topic = ?event.topic_id, "server received event");
            if event.is_control() {
                continue;
            }
            if let Some(topic) = event.topic_id.clone() {
                peer.push(SessionEvent::new("smoke_ack").with_topic(topic));
            }
        }
    }
}
