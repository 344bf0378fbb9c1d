//! Virtual garden system
//!
//! Announces itself, publishes a reading every few seconds and logs the
//! commands it receives. With `--via` it behaves like a mesh node and sends
//! everything as fragments through a coordinator.

use anyhow::{bail, Context, Result};
use clap::Parser;
use garden_shared::codec::encode_fragments;
use garden_shared::crypto::{open, CommandKey, SealedCommand, SEALED_PREFIX};
use garden_shared::topic::{self, command_topic, discovery_topic, telemetry_topic};
use garden_shared::{is_valid_identifier, Announcement, Reading};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "garden-emulator", about = "Virtual garden system for development")]
struct Args {
    /// System identifier (12 hex characters)
    #[arg(long, default_value = "656d75000001")]
    id: String,

    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Seconds between readings
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Act as a mesh node behind this coordinator
    #[arg(long)]
    via: Option<String>,

    /// Mesh key used to open sealed commands
    #[arg(long, env = "GARDEN_MESH_KEY")]
    mesh_key: Option<String>,

    /// Clear every retained discovery message
    #[arg(short = 'c', long)]
    clear: bool,
}

/// Temperature and humidity that cycle through their ranges
#[derive(Debug, Default)]
struct ReadingCycle {
    temperature: u32,
    humidity: u32,
}

impl ReadingCycle {
    fn next_reading(&mut self) -> Reading {
        self.temperature += 2;
        if self.temperature >= 45 {
            self.temperature = 0;
        }
        self.humidity += 3;
        if self.humidity >= 100 {
            self.humidity = 0;
        }

        Reading {
            error: false,
            temperature: self.temperature as f32,
            humidity: self.humidity as f32,
            created_at: 0,
        }
    }
}

fn announcement(is_mesh: bool) -> Announcement {
    Announcement {
        is_emulator: true,
        is_mesh,
        restart_reason: "External System".into(),
        core_version: "0.0.0".into(),
        sdk_version: "2.2.2-dev".into(),
        sensors: ["temperature", "humidity"].into_iter().map(String::from).collect(),
        ..Default::default()
    }
}

/// Render a received command for the log, opening it if it is sealed
fn describe_command(payload: &[u8], key: Option<&CommandKey>) -> String {
    match (payload.first(), key) {
        (Some(&SEALED_PREFIX), Some(key)) => {
            match SealedCommand::from_wire(payload).and_then(|sealed| open(key, &sealed)) {
                Ok(plaintext) => format!("sealed {}", String::from_utf8_lossy(&plaintext)),
                Err(e) => format!("sealed, unable to open: {e}"),
            }
        }
        _ => String::from_utf8_lossy(payload).into_owned(),
    }
}

struct Emulator {
    client: AsyncClient,
    id: String,
    via: Option<String>,
}

impl Emulator {
    /// Publish directly, or as fragments through the coordinator
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        match &self.via {
            None => {
                self.client
                    .publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
                    .await?;
            }
            Some(coordinator) => {
                let packet_topic = telemetry_topic(coordinator, "packet");
                let fragments = encode_fragments(topic, payload, rand::random())?;
                debug!("[mesh] sending {} fragments for {}", fragments.len(), topic);

                for fragment in fragments {
                    self.client
                        .publish(&packet_topic, QoS::AtMostOnce, false, fragment.to_vec())
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn announce(&self) -> Result<()> {
        let payload = serde_json::to_vec(&announcement(self.via.is_some()))?;
        self.publish(&discovery_topic(&self.id), &payload, true).await
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    id: String,
    key: Option<CommandKey>,
    clear: bool,
) {
    let own_commands = command_topic(&id);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("[mqtt] connected");
                for pattern in [own_commands.as_str(), topic::DISCOVERY_SUBSCRIPTION] {
                    if let Err(e) = client.try_subscribe(pattern, QoS::AtMostOnce) {
                        warn!("[mqtt] unable to subscribe to {}: {}", pattern, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == own_commands {
                    info!(
                        "[command] received {}",
                        describe_command(&publish.payload, key.as_ref())
                    );
                } else if clear
                    && !publish.payload.is_empty()
                    && topic::classify(&publish.topic) == topic::MessageKind::Discovery
                {
                    info!("[discovery] clearing {}", publish.topic);
                    if let Err(e) =
                        client.try_publish(publish.topic.as_str(), QoS::AtMostOnce, true, Vec::new())
                    {
                        warn!("[discovery] unable to clear {}: {}", publish.topic, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[mqtt] connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    if !is_valid_identifier(&args.id) {
        bail!("identifier {:?} must be 12 hex characters", args.id);
    }
    if let Some(coordinator) = &args.via {
        if !is_valid_identifier(coordinator) {
            bail!("coordinator {:?} must be 12 hex characters", coordinator);
        }
    }

    let key = args
        .mesh_key
        .as_deref()
        .map(CommandKey::derive)
        .transpose()
        .context("deriving command key")?;

    let mut options = MqttOptions::new(format!("garden-emulator-{}", args.id), &args.host, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(options, 64);

    info!("Emulator {} starting", args.id);
    info!("  broker: {}:{}", args.host, args.port);
    if let Some(coordinator) = &args.via {
        info!("  mesh node behind {}", coordinator);
    }

    tokio::spawn(run_event_loop(
        eventloop,
        client.clone(),
        args.id.clone(),
        key,
        args.clear,
    ));

    let emulator = Emulator {
        client,
        id: args.id,
        via: args.via,
    };
    emulator.announce().await?;

    let data_topic = telemetry_topic(&emulator.id, "data");
    let mut cycle = ReadingCycle::default();
    let mut ticker = interval(Duration::from_secs(args.interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reading = cycle.next_reading();
                let payload = serde_json::to_vec(&reading)?;
                if let Err(e) = emulator.publish(&data_topic, &payload, false).await {
                    warn!("Failed to publish reading: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use garden_shared::crypto::seal;

    #[test]
    fn test_reading_cycle_wraps() {
        let mut cycle = ReadingCycle::default();
        let first = cycle.next_reading();
        assert_eq!(first.temperature, 2.0);
        assert_eq!(first.humidity, 3.0);

        for _ in 0..21 {
            cycle.next_reading();
        }
        // 22 steps of 2 reach 44, the next wraps
        assert_eq!(cycle.temperature, 44);
        assert_eq!(cycle.next_reading().temperature, 0.0);
    }

    #[test]
    fn test_announcement_marks_emulator() {
        let json = serde_json::to_value(announcement(true)).unwrap();
        assert_eq!(json["IsEmulator"], true);
        assert_eq!(json["IsMesh"], true);
        assert_eq!(json["Sensors"], serde_json::json!(["humidity", "temperature"]));
    }

    #[test]
    fn test_describe_sealed_command() {
        let key = CommandKey::derive("mesh key").unwrap();
        let wire = seal(&key, br#"{"Command":"Restart"}"#).unwrap().to_wire();

        assert_eq!(
            describe_command(&wire, Some(&key)),
            r#"sealed {"Command":"Restart"}"#
        );
        assert_eq!(describe_command(b"plain", Some(&key)), "plain");

        let other = CommandKey::derive("other key").unwrap();
        assert!(describe_command(&wire, Some(&other)).contains("unable to open"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "garden-emulator",
            "--via",
            "aabbccddeeff",
            "-c",
        ]);
        assert_eq!(args.via.as_deref(), Some("aabbccddeeff"));
        assert!(args.clear);
        assert_eq!(args.id, "656d75000001");
    }
}
