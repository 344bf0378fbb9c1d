//! Push events for dashboard clients

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, trace};

/// Event kind sent after a record changes
pub const EVENT_UPDATE: &str = "update";

/// Event kind sent after a record is removed
pub const EVENT_DELETE: &str = "delete";

/// One event as pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayEvent {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Data")]
    pub data: Value,
}

/// Fan-out of events to whoever is listening. Must not block.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, kind: &str, data: Value);
}

/// Serialize `data` and broadcast it
pub fn emit<T: Serialize>(sink: &dyn EventSink, kind: &str, data: &T) {
    match serde_json::to_value(data) {
        Ok(value) => sink.broadcast(kind, value),
        Err(e) => error!("[events] unable to serialize {} event: {}", kind, e),
    }
}

/// Event sink backed by a tokio broadcast channel
pub struct EventHub {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for EventHub {
    fn broadcast(&self, kind: &str, data: Value) {
        let event = GatewayEvent {
            kind: kind.to_string(),
            data,
        };

        // Nobody listening is fine
        if self.tx.send(event).is_err() {
            trace!("[events] dropped {} event, no subscribers", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();

        emit(&hub, EVENT_UPDATE, &json!({"Identifier": "84cca8abcdef"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "update");
        assert_eq!(event.data["Identifier"], "84cca8abcdef");

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["Type"], "update");
        assert!(wire.get("Data").is_some());
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let hub = EventHub::default();
        hub.broadcast(EVENT_DELETE, Value::Null);
    }
}
