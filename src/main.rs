use anyhow::Context;
use garden_gateway::events::EventHub;
use garden_gateway::registry::MemoryStore;
use garden_gateway::transport::MqttTransport;
use garden_gateway::{Gateway, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref())?;

    info!("[MAIN] Garden gateway starting");
    info!("[MAIN]   broker: {}:{}", config.mqtt.host, config.mqtt.port);
    info!("[MAIN]   firmware: {}", config.firmware.dir.display());

    let store = Arc::new(MemoryStore::new(config.mesh.mesh_key.clone()));
    let events = Arc::new(EventHub::default());
    let (transport, mut inbound) = MqttTransport::connect(&config.mqtt);
    let transport = Arc::new(transport);

    let gateway = Gateway::new(&config, store, events, transport)
        .await
        .context("initializing gateway")?;
    gateway.start().await.context("subscribing")?;

    let sweeper = gateway.sweeper();
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let dispatcher = gateway.dispatcher();

    // Main event loop
    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.handle(message).await;
                    });
                }
                None => {
                    error!("[MAIN] Broker connection closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("[MAIN] Shutting down");
                break;
            }
        }
    }

    Ok(())
}
