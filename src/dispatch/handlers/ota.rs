//! OTA status report handler

use super::HandlerContext;
use crate::error::{GatewayError, Result};
use crate::events::{emit, EVENT_UPDATE};
use garden_shared::OtaStatus;
use tracing::info;

/// Attach an update status to the in-memory record only
pub async fn handle_update_status(ctx: &HandlerContext, id: &str, payload: &[u8]) -> Result<()> {
    let status: OtaStatus = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Decode(format!("update status from {id}: {e}")))?;

    info!(
        "[ota] {}: success={} message={:?}",
        id, status.success, status.message
    );

    let record = ctx
        .registry
        .update(id, |r| r.record_update_status(status))
        .await
        .ok_or_else(|| GatewayError::NotFound(format!("update status from unknown system {id}")))?;

    emit(ctx.events.as_ref(), EVENT_UPDATE, &record);
    Ok(())
}
