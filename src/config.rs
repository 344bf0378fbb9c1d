//! Gateway configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.

use anyhow::{Context, Result};
use garden_shared::limits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub mesh: MeshConfig,
    pub firmware: FirmwareConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub publish_timeout_ms: u64,
    /// Capacity of the inbound message channel
    pub channel_capacity: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: "garden-backend".into(),
            keep_alive_secs: 30,
            publish_timeout_ms: limits::PUBLISH_TIMEOUT_MS,
            channel_capacity: 256,
            reconnect_delay_ms: 1000,
        }
    }
}

impl MqttConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Lifetime of an incomplete fragment buffer
    pub fragment_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    /// Shared mesh secret; generated on first run when absent
    pub mesh_key: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            fragment_ttl_ms: limits::FRAGMENT_TTL_MS,
            sweep_interval_ms: 1000,
            mesh_key: None,
        }
    }
}

impl MeshConfig {
    pub fn fragment_ttl(&self) -> Duration {
        Duration::from_millis(self.fragment_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Holds one subdirectory per board
    pub dir: PathBuf,
    pub binary: String,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/firmware"),
            binary: "firmware.bin".into(),
        }
    }
}

impl GatewayConfig {
    /// Read `path` if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing config")
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            // host:port is accepted as well
            match host.rsplit_once(':') {
                Some((h, p)) => {
                    self.mqtt.port = p
                        .parse()
                        .with_context(|| format!("invalid port in MQTT_HOST: {host}"))?;
                    self.mqtt.host = h.to_string();
                }
                None => self.mqtt.host = host,
            }
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("invalid MQTT_PORT: {port}"))?;
        }
        if let Some(user) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        if let Some(key) = lookup("GARDEN_MESH_KEY") {
            self.mesh.mesh_key = Some(key);
        }
        if let Some(dir) = lookup("GARDEN_FIRMWARE_DIR") {
            self.firmware.dir = PathBuf::from(dir);
        }
        Ok(())
    }
}
