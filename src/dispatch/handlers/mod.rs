//! Handlers for each inbound message kind

mod discovery;
mod ota;
mod telemetry;

pub use discovery::handle_discovery;
pub use ota::handle_update_status;
pub use telemetry::{handle_mesh_stats, handle_networks, handle_reading};

use crate::events::EventSink;
use crate::registry::{DeviceRegistry, SystemStore};
use std::sync::Arc;

/// Shared state passed to message handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<dyn SystemStore>,
    pub events: Arc<dyn EventSink>,
}
