//! Command encoder - validates, optionally seals and routes operator commands

use super::mesh;
use crate::error::{GatewayError, Result};
use crate::registry::{DeviceRegistry, SystemStore};
use crate::transport::{QoS, Transport, TransportError};
use bytes::Bytes;
use garden_shared::crypto::{self, CommandKey};
use garden_shared::topic::command_topic;
use garden_shared::{is_broadcast, is_valid_identifier, limits};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Sends commands to garden systems, directly or relayed through the
/// mesh coordinator
pub struct CommandSender {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn SystemStore>,
    transport: Arc<dyn Transport>,
    publish_timeout: Duration,
}

impl CommandSender {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn SystemStore>,
        transport: Arc<dyn Transport>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            publish_timeout,
        }
    }

    /// Send `command` to `id`, sealing it under the key derived from the
    /// stored mesh secret when `encrypt` is set
    pub async fn send_command(&self, id: &str, command: &[u8], encrypt: bool) -> Result<()> {
        validate(id, command, encrypt)?;

        let key = if encrypt {
            Some(self.derived_key().await?)
        } else {
            None
        };

        self.route(id, command, key.as_ref()).await
    }

    /// Send `command` to `id` sealed under an explicit key
    pub async fn send_command_with_key(
        &self,
        id: &str,
        command: &[u8],
        key: &CommandKey,
    ) -> Result<()> {
        validate(id, command, true)?;
        self.route(id, command, Some(key)).await
    }

    async fn derived_key(&self) -> Result<CommandKey> {
        let configuration = self.store.get_configuration().await?;
        Ok(CommandKey::derive(&configuration.mesh_key)?)
    }

    async fn route(&self, id: &str, command: &[u8], key: Option<&CommandKey>) -> Result<()> {
        let is_mesh = if is_broadcast(id) {
            true
        } else {
            self.registry
                .get(id)
                .await
                .ok_or_else(|| GatewayError::NotFound(format!("system {id}")))?
                .announcement
                .is_mesh
        };

        let wire = match key {
            Some(key) => {
                debug!("[command] encrypting command for {}", id);
                crypto::seal(key, command)?.to_wire()
            }
            None => command.to_vec(),
        };

        if is_mesh {
            let coordinator = self.registry.coordinator().await?;
            debug!(
                "[command] {} is mesh connected, relaying through {}",
                id, coordinator.identifier
            );
            let envelope = mesh::build_envelope(id, &wire)?;
            self.publish(&command_topic(&coordinator.identifier), envelope)
                .await
        } else {
            self.publish(&command_topic(id), wire).await
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        debug!("[command] publishing {} bytes to {}", payload.len(), topic);

        timeout(
            self.publish_timeout,
            self.transport
                .publish(topic, Bytes::from(payload), QoS::AtMostOnce, false),
        )
        .await
        .map_err(|_| TransportError::Timeout(topic.to_string()))??;

        Ok(())
    }
}

fn validate(id: &str, command: &[u8], encrypt: bool) -> Result<()> {
    if !is_valid_identifier(id) {
        return Err(GatewayError::Validation(format!(
            "invalid system identifier {id:?}"
        )));
    }
    if command.is_empty() {
        return Err(GatewayError::Validation("empty command".into()));
    }

    let limit = if encrypt {
        limits::MAX_ENCRYPTED_COMMAND_LEN
    } else {
        limits::MAX_COMMAND_LEN
    };
    if command.len() > limit {
        return Err(GatewayError::Validation(format!(
            "command is {} bytes, limit is {}",
            command.len(),
            limit
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryStore;
    use crate::transport::mock::MockTransport;
    use garden_shared::crypto::{open, SealedCommand};
    use garden_shared::{Announcement, DeviceRecord, BROADCAST_ID};
    use serde_json::Value;

    const MESH_KEY: &str = "4B5DDWMTG346NBVFNIO4MPQ644RIBF52MJM6VATLH3DS2HPT76MF24TV5X7IMSI";
    const COORDINATOR: &str = "aabbccddeeff";
    const DIRECT: &str = "84cca8abcdef";
    const MESH_NODE: &str = "84cca8000001";

    fn record(id: &str, is_mesh: bool, channel: i32) -> DeviceRecord {
        DeviceRecord::from_announcement(
            id,
            Announcement {
                is_mesh,
                channel,
                ..Default::default()
            },
        )
    }

    async fn sender_with(transport: Arc<MockTransport>) -> CommandSender {
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert(record(COORDINATOR, false, 6)).await;
        registry.upsert(record(DIRECT, false, 0)).await;
        registry.upsert(record(MESH_NODE, true, 0)).await;

        CommandSender::new(
            registry,
            Arc::new(MemoryStore::new(Some(MESH_KEY.into()))),
            transport,
            Duration::from_millis(100),
        )
    }

    fn relayed_payload(published: &[u8]) -> String {
        let envelope: Value = serde_json::from_slice(published).unwrap();
        assert_eq!(envelope["Command"], "Publish");
        envelope["Payload"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_direct_command() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        sender
            .send_command(DIRECT, br#"{"Command":"Restart"}"#, false)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "garden/module/84cca8abcdef/cmnd");
        assert_eq!(published[0].payload_str(), r#"{"Command":"Restart"}"#);
    }

    #[tokio::test]
    async fn test_mesh_command_goes_to_coordinator() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        sender
            .send_command(MESH_NODE, br#"{"Command":"Restart"}"#, false)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published[0].topic, "garden/module/aabbccddeeff/cmnd");
        assert_eq!(
            relayed_payload(&published[0].payload),
            r#"{"Command":"Restart","D":"dst-84cca8000001"}"#
        );
    }

    #[tokio::test]
    async fn test_broadcast_is_always_relayed() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        sender
            .send_command(BROADCAST_ID, br#"{"Command":"Ping"}"#, false)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published[0].topic, "garden/module/aabbccddeeff/cmnd");
        assert_eq!(
            relayed_payload(&published[0].payload),
            r#"{"Command":"Ping","D":"dst-FFFFFFFFFFFF"}"#
        );
    }

    #[tokio::test]
    async fn test_lowercase_broadcast_is_not_relayed() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        let result = sender
            .send_command("ffffffffffff", br#"{"Command":"Ping"}"#, false)
            .await;

        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_mesh_command() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;
        let command = br#"{"Command":"Restart"}"#;

        sender.send_command(MESH_NODE, command, true).await.unwrap();

        let published = transport.published().await;
        let payload = relayed_payload(&published[0].payload);
        let raw = hex::decode(payload.strip_prefix('h').unwrap()).unwrap();
        let wire = raw.strip_prefix(b"dst-84cca8000001").unwrap();

        let key = CommandKey::derive(MESH_KEY).unwrap();
        let sealed = SealedCommand::from_wire(wire).unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), command);
    }

    #[tokio::test]
    async fn test_encrypted_direct_command_with_key() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;
        let key = CommandKey::new([7u8; 32]);

        sender
            .send_command_with_key(DIRECT, b"restart", &key)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published[0].topic, "garden/module/84cca8abcdef/cmnd");
        let sealed = SealedCommand::from_wire(&published[0].payload).unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"restart");
    }

    #[tokio::test]
    async fn test_size_limits() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        let result = sender.send_command(DIRECT, &[b'a'; 211], false).await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));

        let result = sender.send_command(DIRECT, &[b'a'; 185], true).await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));

        sender.send_command(DIRECT, &[b'a'; 210], false).await.unwrap();
        sender.send_command(DIRECT, &[b'a'; 184], true).await.unwrap();
        assert_eq!(transport.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        let cases: [(&str, &[u8]); 3] = [
            ("84cca8", &b"x"[..]),
            ("84cca8abcdeg", &b"x"[..]),
            (DIRECT, &b""[..]),
        ];
        for (id, command) in cases {
            assert!(matches!(
                sender.send_command(id, command, false).await,
                Err(GatewayError::Validation(_))
            ));
        }
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let transport = Arc::new(MockTransport::new());
        let sender = sender_with(transport.clone()).await;

        assert!(matches!(
            sender.send_command("000000000000", b"x", false).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mesh_without_coordinator_fails() {
        let transport = Arc::new(MockTransport::new());
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert(record(MESH_NODE, true, 0)).await;
        let sender = CommandSender::new(
            registry,
            Arc::new(MemoryStore::default()),
            transport.clone(),
            Duration::from_millis(100),
        );

        assert!(matches!(
            sender.send_command(MESH_NODE, b"{}", false).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_timeout() {
        let transport = Arc::new(MockTransport::stalled(Duration::from_secs(5)));
        let sender = sender_with(transport).await;

        let result = sender.send_command(DIRECT, b"x", false).await;
        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let transport = Arc::new(MockTransport::failing());
        let sender = sender_with(transport).await;

        let result = sender.send_command(DIRECT, b"x", false).await;
        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::Publish { .. }))
        ));
    }
}
