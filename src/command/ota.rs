//! Over-the-air update commands
//!
//! The update command tells a system which network to join and where to
//! download its firmware. The checksum is MD5 only because the ESP8266
//! updater accepts nothing else.

use crate::config::FirmwareConfig;
use crate::error::{GatewayError, Result};
use crate::registry::DeviceRegistry;
use md5::{Digest, Md5};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PSK_LEN: usize = 64;

/// Firmware family, which is also its download directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    Esp32,
    Esp8266,
}

impl Board {
    /// Resolve the board from an announced chipset such as `ESP32-D0WD`
    pub fn from_chipset(chipset: &str) -> Option<Self> {
        let chipset = chipset.to_ascii_lowercase();
        if chipset.contains("esp8266") {
            Some(Board::Esp8266)
        } else if chipset.contains("esp32") {
            Some(Board::Esp32)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Board::Esp32 => "esp32",
            Board::Esp8266 => "esp8266",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field order matters to the firmware parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCommand {
    #[serde(rename = "Command")]
    pub command: &'static str,
    #[serde(rename = "S")]
    pub ssid: String,
    #[serde(rename = "P")]
    pub psk: String,
    #[serde(rename = "U")]
    pub url: String,
    #[serde(rename = "L")]
    pub size: u64,
    #[serde(rename = "C")]
    pub checksum: String,
}

/// Hex MD5 digest
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Builds update commands from the firmware binaries on disk
pub struct OtaBuilder {
    registry: Arc<DeviceRegistry>,
    firmware: FirmwareConfig,
}

impl OtaBuilder {
    pub fn new(registry: Arc<DeviceRegistry>, firmware: FirmwareConfig) -> Self {
        Self { registry, firmware }
    }

    fn binary_path(&self, board: Board) -> PathBuf {
        self.firmware.dir.join(board.as_str()).join(&self.firmware.binary)
    }

    /// Build the update command for system `id`, downloading from `host`
    pub async fn build(&self, id: &str, ssid: &str, psk: &str, host: &str) -> Result<UpdateCommand> {
        if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
            return Err(GatewayError::Validation(format!(
                "SSID must be 1 to {MAX_SSID_LEN} bytes"
            )));
        }
        if psk.is_empty() || psk.len() > MAX_PSK_LEN {
            return Err(GatewayError::Validation(format!(
                "PSK must be 1 to {MAX_PSK_LEN} bytes"
            )));
        }

        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("system {id}")))?;

        let chipset = &record.announcement.chipset;
        let board = Board::from_chipset(chipset)
            .ok_or_else(|| GatewayError::NotFound(format!("firmware for chipset {chipset:?}")))?;

        let path = self.binary_path(board);
        let firmware = tokio::fs::read(&path).await.map_err(|e| {
            GatewayError::NotFound(format!("firmware binary {}: {}", path.display(), e))
        })?;

        debug!(
            "[ota] {}: {} firmware is {} bytes",
            id,
            board,
            firmware.len()
        );

        Ok(UpdateCommand {
            command: "Update",
            ssid: ssid.to_string(),
            psk: psk.to_string(),
            url: format!("http://{host}/firmware/{board}/{}", self.firmware.binary),
            size: firmware.len() as u64,
            checksum: md5_hex(&firmware),
        })
    }

    /// Serialized form of [`OtaBuilder::build`]
    pub async fn build_payload(&self, id: &str, ssid: &str, psk: &str, host: &str) -> Result<Vec<u8>> {
        let command = self.build(id, ssid, psk, host).await?;
        serde_json::to_vec(&command)
            .map_err(|e| GatewayError::Validation(format!("unable to encode update command: {e}")))
    }
}
