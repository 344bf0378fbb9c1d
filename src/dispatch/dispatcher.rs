//! Inbound message dispatcher - classifies by topic and routes to handlers

use super::handlers::{self, HandlerContext};
use super::reassembly::{FragmentBuffer, Reassembly};
use crate::error::{GatewayError, Result};
use crate::events::EventSink;
use crate::registry::{DeviceRegistry, SystemStore};
use crate::transport::InboundMessage;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use garden_shared::codec;
use garden_shared::topic::{self, MessageKind};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Routes every inbound message to the handler for its kind.
///
/// Failures stay local to the message that caused them.
pub struct Dispatcher {
    ctx: HandlerContext,
    fragments: Arc<FragmentBuffer>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn SystemStore>,
        events: Arc<dyn EventSink>,
        fragments: Arc<FragmentBuffer>,
    ) -> Self {
        Self {
            ctx: HandlerContext {
                registry,
                store,
                events,
            },
            fragments,
        }
    }

    /// Handle one message, logging and dropping it on failure
    pub async fn handle(&self, message: InboundMessage) {
        if let Err(e) = self.dispatch(&message.topic, message.payload).await {
            warn!("[dispatch] dropped message on {}: {}", message.topic, e);
        }
    }

    /// Classify and handle a message. Reassembled mesh messages come back
    /// through here with their original topic.
    pub fn dispatch<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, Result<MessageKind>> {
        async move {
            let kind = topic::classify(topic);
            debug!(
                "[dispatch] {} ({} bytes) on {}",
                kind,
                payload.len(),
                topic
            );

            match kind {
                MessageKind::Discovery => {
                    handlers::handle_discovery(&self.ctx, topic, &payload).await?;
                }
                MessageKind::TelemetryData => {
                    handlers::handle_reading(&self.ctx, sender(topic)?, &payload).await?;
                }
                MessageKind::TelemetryOta => {
                    handlers::handle_update_status(&self.ctx, sender(topic)?, &payload).await?;
                }
                MessageKind::TelemetryNetworks => {
                    handlers::handle_networks(sender(topic)?, &payload)?;
                }
                MessageKind::TelemetryMesh => {
                    handlers::handle_mesh_stats(sender(topic)?, &payload)?;
                }
                MessageKind::TelemetryPing => {
                    trace!("[dispatch] ping from {}", sender(topic)?);
                }
                MessageKind::TelemetryPacket => {
                    self.handle_packet(&payload).await?;
                }
                MessageKind::Unknown => {
                    warn!("[dispatch] unknown topic {}, dropping", topic);
                }
            }

            Ok::<_, GatewayError>(kind)
        }
        .boxed()
    }

    async fn handle_packet(&self, raw: &[u8]) -> Result<()> {
        let fragment = codec::decode_fragment(raw)?;

        if fragment.is_missing_topic() {
            warn!(
                "[mesh] {}: first fragment has no topic separator",
                fragment.correlation
            );
        }

        let (topic, payload) = match self.fragments.accept(fragment).await? {
            Reassembly::Pending { .. } => return Ok(()),
            Reassembly::Complete { topic, payload } => (topic, payload),
        };

        let Some(topic) = topic else {
            warn!("[mesh] reassembled message without topic, dropping");
            return Ok(());
        };

        let Some(origin) = topic::mesh_sender_id(&topic) else {
            return Err(GatewayError::Decode(format!(
                "reassembled topic {topic} names no system"
            )));
        };

        debug!("[mesh] redispatching message from {} on {}", origin, topic);
        self.dispatch(&topic, payload).await?;
        Ok(())
    }
}

fn sender(topic: &str) -> Result<&str> {
    topic::sender_id(topic)
        .ok_or_else(|| GatewayError::Decode(format!("no system identifier in {topic}")))
}
