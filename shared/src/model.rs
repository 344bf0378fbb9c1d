//! Device data model
//!
//! Field names serialize in the PascalCase form the dashboard expects. Devices
//! announce themselves with a minified key set to save radio bytes, so the
//! announcement also accepts those short keys when deserializing.

use crate::{limits, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Discovery payload a garden system publishes on boot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Announcement {
    /// Virtual system; never sent by real hardware
    pub is_emulator: bool,
    /// Reachable only through the coordinator's mesh radio
    #[serde(alias = "ME")]
    pub is_mesh: bool,
    /// Wi-Fi channel, only reported by the coordinator
    #[serde(alias = "CH")]
    pub channel: i32,
    #[serde(alias = "RR")]
    pub restart_reason: String,
    #[serde(alias = "CV")]
    pub core_version: String,
    #[serde(alias = "SV")]
    pub sdk_version: String,
    #[serde(alias = "TY")]
    pub chipset: String,
    #[serde(alias = "FU")]
    pub filesystem_used_size: u64,
    #[serde(alias = "FT")]
    pub filesystem_total_size: u64,
    pub sensors: BTreeSet<String>,
}

/// A single sensor reading. Missing fields read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Reading {
    pub error: bool,
    pub temperature: f32,
    pub humidity: f32,
    /// Stamped by the gateway on arrival
    pub created_at: u64,
}

/// Progress report for an over-the-air update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OtaStatus {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl OtaStatus {
    /// Status attached to a system that has just announced itself
    pub fn restarted() -> Self {
        Self {
            success: true,
            message: "Backend: device restarted".into(),
        }
    }
}

/// Relay counters reported by a coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshStats {
    #[serde(rename = "SE", default)]
    pub total_sent: u64,
    #[serde(rename = "RC", default)]
    pub total_received: u64,
    #[serde(rename = "DL", default)]
    pub dropped_bad_length: u64,
    #[serde(rename = "DA", default)]
    pub dropped_invalid_auth: u64,
    #[serde(rename = "AC", default)]
    pub total_accepted: u64,
}

/// One access point from a Wi-Fi scan report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScannedNetwork {
    #[serde(default)]
    pub known: bool,
    #[serde(rename = "MAC")]
    pub mac: String,
    #[serde(rename = "RSSI")]
    pub rssi: i32,
}

/// Everything the gateway knows about one garden system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRecord {
    pub identifier: String,
    pub announcement: Announcement,
    pub last_reading: Option<Reading>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    pub update_status: Option<OtaStatus>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DeviceRecord {
    /// Create a fresh record from a discovery announcement
    pub fn from_announcement(identifier: impl Into<String>, announcement: Announcement) -> Self {
        let now = now_ms();
        Self {
            identifier: identifier.into(),
            announcement,
            last_reading: None,
            readings: Vec::new(),
            update_status: Some(OtaStatus::restarted()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Take a new announcement from a system that restarted.
    ///
    /// Reading history and the creation time survive.
    pub fn reannounce(&mut self, announcement: Announcement) {
        self.announcement = announcement;
        self.update_status = Some(OtaStatus::restarted());
        self.updated_at = now_ms();
    }

    /// Coordinators bridge MQTT and the mesh: they report a channel and are
    /// not themselves mesh connected.
    pub fn is_coordinator(&self) -> bool {
        !self.announcement.is_mesh && self.announcement.channel >= 1
    }

    /// Append a reading, keeping the history bounded
    pub fn record_reading(&mut self, mut reading: Reading) {
        let now = now_ms();
        if reading.created_at == 0 {
            reading.created_at = now;
        }

        self.readings.push(reading.clone());
        if self.readings.len() > limits::MAX_READING_HISTORY {
            let excess = self.readings.len() - limits::MAX_READING_HISTORY;
            self.readings.drain(..excess);
        }

        self.last_reading = Some(reading);
        self.updated_at = now;
    }

    /// Attach an OTA progress report
    pub fn record_update_status(&mut self, status: OtaStatus) {
        self.update_status = Some(status);
        self.updated_at = now_ms();
    }
}

/// Gateway-wide secrets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    /// Raw mesh key. Authenticates mesh traffic and seeds every derived key.
    pub mesh_key: String,
}
