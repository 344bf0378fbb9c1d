//! Telemetry handlers

use super::HandlerContext;
use crate::error::{GatewayError, Result};
use crate::events::{emit, EVENT_UPDATE};
use garden_shared::{MeshStats, Reading, ScannedNetwork};
use tracing::{debug, error};

/// Append a sensor reading to a known system.
///
/// Readings never create systems; an unknown sender is [`GatewayError::NotFound`].
pub async fn handle_reading(ctx: &HandlerContext, id: &str, payload: &[u8]) -> Result<()> {
    let reading: Reading = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Decode(format!("reading from {id}: {e}")))?;

    debug!(
        "[telemetry] {}: temperature={} humidity={} error={}",
        id, reading.temperature, reading.humidity, reading.error
    );

    let record = ctx
        .registry
        .update(id, |r| r.record_reading(reading))
        .await
        .ok_or_else(|| GatewayError::NotFound(format!("reading from unknown system {id}")))?;

    if let Err(e) = ctx.store.update_system(&record).await {
        error!("[telemetry] unable to save reading for {}: {}", id, e);
    }

    emit(ctx.events.as_ref(), EVENT_UPDATE, &record);
    Ok(())
}

pub fn handle_networks(id: &str, payload: &[u8]) -> Result<()> {
    let networks: Vec<ScannedNetwork> = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Decode(format!("network scan from {id}: {e}")))?;

    debug!("[telemetry] {}: scanned {} networks", id, networks.len());
    for network in &networks {
        debug!(
            "[telemetry]   {} rssi={} known={}",
            network.mac, network.rssi, network.known
        );
    }
    Ok(())
}

pub fn handle_mesh_stats(id: &str, payload: &[u8]) -> Result<()> {
    let stats: MeshStats = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Decode(format!("mesh stats from {id}: {e}")))?;

    debug!(
        "[mesh] {}: sent={} received={} accepted={} bad_length={} bad_auth={}",
        id,
        stats.total_sent,
        stats.total_received,
        stats.total_accepted,
        stats.dropped_bad_length,
        stats.dropped_invalid_auth
    );
    Ok(())
}
