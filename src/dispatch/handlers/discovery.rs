//! Discovery announcement handler

use super::HandlerContext;
use crate::error::{GatewayError, Result};
use crate::events::{emit, EVENT_UPDATE};
use garden_shared::topic::last_segment;
use garden_shared::{is_valid_identifier, Announcement};
use tracing::{error, info, trace};

/// Register the announcing system. A restart replaces the announcement but
/// keeps the reading history.
///
/// An empty payload is a retained message being cleared and is ignored.
pub async fn handle_discovery(ctx: &HandlerContext, topic: &str, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        trace!("[discovery] ignoring cleared announcement on {}", topic);
        return Ok(());
    }

    let id = last_segment(topic);
    if !is_valid_identifier(id) {
        return Err(GatewayError::Validation(format!(
            "announcement on {topic} has no valid identifier"
        )));
    }

    let announcement: Announcement = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Decode(format!("announcement from {id}: {e}")))?;

    info!(
        "[discovery] {} announced: chipset={} mesh={} channel={} reason={:?}",
        id,
        announcement.chipset,
        announcement.is_mesh,
        announcement.channel,
        announcement.restart_reason
    );

    let record = ctx.registry.announce(id, announcement).await;

    if let Err(e) = ctx.store.create_or_replace_system(&record).await {
        error!("[discovery] unable to save {}: {}", id, e);
    }

    emit(ctx.events.as_ref(), EVENT_UPDATE, &record);
    Ok(())
}
