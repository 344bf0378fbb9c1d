//! Gateway facade
//!
//! Wires the registry, store, dispatcher and command path together and
//! exposes the operations an HTTP layer would call.

use crate::command::{CommandSender, MeshInfo, OtaBuilder};
use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, FragmentBuffer, FragmentSweeper};
use crate::error::{GatewayError, Result};
use crate::events::{emit, EventSink, EVENT_DELETE};
use crate::registry::{DeviceRegistry, StoreError, SystemStore};
use crate::transport::{QoS, Transport};
use garden_shared::crypto::CommandKey;
use garden_shared::topic::{DISCOVERY_SUBSCRIPTION, TELEMETRY_SUBSCRIPTION};
use garden_shared::{identifier_to_address, DeviceRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Gateway {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn SystemStore>,
    events: Arc<dyn EventSink>,
    transport: Arc<dyn Transport>,
    fragments: Arc<FragmentBuffer>,
    dispatcher: Arc<Dispatcher>,
    sender: CommandSender,
    ota: OtaBuilder,
    sweep_interval: Duration,
}

impl Gateway {
    /// Build the gateway and hydrate the registry from the store
    pub async fn new(
        config: &GatewayConfig,
        store: Arc<dyn SystemStore>,
        events: Arc<dyn EventSink>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let loaded = registry.load_from(store.as_ref()).await?;
        info!("[gateway] loaded {} systems", loaded);

        let fragments = Arc::new(FragmentBuffer::new(config.mesh.fragment_ttl()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            store.clone(),
            events.clone(),
            fragments.clone(),
        ));
        let sender = CommandSender::new(
            registry.clone(),
            store.clone(),
            transport.clone(),
            config.mqtt.publish_timeout(),
        );
        let ota = OtaBuilder::new(registry.clone(), config.firmware.clone());

        Ok(Self {
            registry,
            store,
            events,
            transport,
            fragments,
            dispatcher,
            sender,
            ota,
            sweep_interval: config.mesh.sweep_interval(),
        })
    }

    /// Subscribe to discovery and telemetry traffic
    pub async fn start(&self) -> Result<()> {
        for pattern in [DISCOVERY_SUBSCRIPTION, TELEMETRY_SUBSCRIPTION] {
            self.transport.subscribe(pattern, QoS::AtMostOnce).await?;
            info!("[gateway] subscribed to {} via {}", pattern, self.transport.name());
        }
        Ok(())
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Sweeper that expires abandoned fragment buffers
    pub fn sweeper(&self) -> FragmentSweeper {
        FragmentSweeper::new(self.fragments.clone(), self.sweep_interval)
    }

    pub async fn systems(&self) -> Vec<DeviceRecord> {
        self.registry.get_all().await
    }

    pub async fn system(&self, id: &str) -> Result<DeviceRecord> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("system {id}")))
    }

    /// Forget a system and tell clients it is gone
    pub async fn delete_system(&self, id: &str) -> Result<()> {
        let record = self
            .registry
            .delete(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("system {id}")))?;

        match self.store.delete_system(id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => error!("[gateway] unable to delete {} from store: {}", id, e),
        }

        info!("[gateway] deleted {}", id);
        emit(self.events.as_ref(), EVENT_DELETE, &record);
        Ok(())
    }

    /// Details a new node needs to join the mesh
    pub async fn mesh_info(&self) -> Result<MeshInfo> {
        let configuration = self.store.get_configuration().await?;
        let coordinator = self.registry.coordinator().await?;

        let controller = identifier_to_address(&coordinator.identifier).ok_or_else(|| {
            GatewayError::Validation(format!(
                "coordinator identifier {} is not an address",
                coordinator.identifier
            ))
        })?;

        Ok(MeshInfo {
            key: configuration.mesh_key,
            controller,
            channel: coordinator.announcement.channel,
        })
    }

    pub async fn send_command(&self, id: &str, command: &str, encrypt: bool) -> Result<()> {
        self.sender.send_command(id, command.as_bytes(), encrypt).await
    }

    pub async fn send_command_with_key(
        &self,
        id: &str,
        command: &str,
        key: &CommandKey,
    ) -> Result<()> {
        self.sender
            .send_command_with_key(id, command.as_bytes(), key)
            .await
    }

    pub async fn build_ota_command(
        &self,
        id: &str,
        ssid: &str,
        psk: &str,
        host: &str,
    ) -> Result<Vec<u8>> {
        self.ota.build_payload(id, ssid, psk, host).await
    }

    /// Build the update command for `id` and send it sealed
    pub async fn send_ota_update(&self, id: &str, ssid: &str, psk: &str, host: &str) -> Result<()> {
        let payload = self.build_ota_command(id, ssid, psk, host).await?;
        info!("[ota] sending update command to {}", id);
        self.sender.send_command(id, &payload, true).await
    }
}
