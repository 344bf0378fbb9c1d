//! Garden gateway
//!
//! Bridges garden systems on the MQTT broker and their ESP-NOW mesh to the
//! dashboard: ingests announcements and telemetry, reassembles fragmented
//! mesh traffic and sends (optionally sealed) commands back.

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod registry;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
