//! Persistence collaborator

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use garden_shared::{Configuration, DeviceRecord};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Random bytes behind a freshly generated mesh key
const MESH_KEY_BYTES: usize = 48;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("System not found: {0}")]
    NotFound(String),

    #[error("No unique coordinator")]
    NoCoordinator,

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Durable storage for device records and gateway configuration.
///
/// Handlers save copies after releasing the registry lock, so saves can
/// arrive out of order. Implementations ignore a record older than the one
/// they hold, going by `updated_at`.
#[async_trait]
pub trait SystemStore: Send + Sync {
    async fn get_system(&self, id: &str) -> Result<DeviceRecord, StoreError>;

    async fn get_all_systems(&self) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Save an existing record; fails if it was never created
    async fn update_system(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    async fn create_or_replace_system(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    async fn delete_system(&self, id: &str) -> Result<(), StoreError>;

    async fn get_coordinator(&self) -> Result<DeviceRecord, StoreError>;

    async fn get_configuration(&self) -> Result<Configuration, StoreError>;
}

/// Generate a mesh key: 48 random bytes, base64 without padding
pub fn generate_mesh_key() -> String {
    let mut raw = [0u8; MESH_KEY_BYTES];
    OsRng.fill_bytes(&mut raw);
    STANDARD_NO_PAD.encode(raw)
}

/// Store that keeps everything in memory
pub struct MemoryStore {
    systems: RwLock<HashMap<String, DeviceRecord>>,
    configuration: Configuration,
}

impl MemoryStore {
    /// Create a store, generating a mesh key unless one is supplied
    pub fn new(mesh_key: Option<String>) -> Self {
        let mesh_key = match mesh_key.filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => {
                tracing::info!("[store] generated a new mesh key");
                generate_mesh_key()
            }
        };

        Self {
            systems: RwLock::new(HashMap::new()),
            configuration: Configuration { mesh_key },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SystemStore for MemoryStore {
    async fn get_system(&self, id: &str) -> Result<DeviceRecord, StoreError> {
        let systems = self.systems.read().await;
        systems
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_all_systems(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let systems = self.systems.read().await;
        let mut all: Vec<DeviceRecord> = systems.values().cloned().collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(all)
    }

    async fn update_system(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        let mut systems = self.systems.write().await;
        match systems.get_mut(&record.identifier) {
            Some(existing) => {
                replace_if_newer(existing, record);
                Ok(())
            }
            None => Err(StoreError::NotFound(record.identifier.clone())),
        }
    }

    async fn create_or_replace_system(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        let mut systems = self.systems.write().await;
        match systems.get_mut(&record.identifier) {
            Some(existing) => replace_if_newer(existing, record),
            None => {
                systems.insert(record.identifier.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn delete_system(&self, id: &str) -> Result<(), StoreError> {
        let mut systems = self.systems.write().await;
        systems
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_coordinator(&self) -> Result<DeviceRecord, StoreError> {
        let systems = self.systems.read().await;
        let mut coordinators = systems.values().filter(|r| r.is_coordinator());

        match (coordinators.next(), coordinators.next()) {
            (Some(record), None) => Ok(record.clone()),
            _ => Err(StoreError::NoCoordinator),
        }
    }

    async fn get_configuration(&self) -> Result<Configuration, StoreError> {
        Ok(self.configuration.clone())
    }
}

fn replace_if_newer(existing: &mut DeviceRecord, record: &DeviceRecord) {
    if record.updated_at < existing.updated_at {
        tracing::debug!(
            "[store] ignoring stale save of {} ({} < {})",
            record.identifier,
            record.updated_at,
            existing.updated_at
        );
        return;
    }
    *existing = record.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use garden_shared::Announcement;

    fn record(id: &str, channel: i32) -> DeviceRecord {
        DeviceRecord::from_announcement(
            id,
            Announcement {
                channel,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_generated_mesh_key() {
        let key = generate_mesh_key();
        assert_eq!(key.len(), 64);
        assert!(!key.ends_with('='));
        assert_ne!(key, generate_mesh_key());
    }

    #[tokio::test]
    async fn test_configured_mesh_key_is_kept() {
        let store = MemoryStore::new(Some("secret".into()));
        assert_eq!(store.get_configuration().await.unwrap().mesh_key, "secret");

        let store = MemoryStore::new(Some(String::new()));
        assert_eq!(store.get_configuration().await.unwrap().mesh_key.len(), 64);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = MemoryStore::default();
        let r = record("84cca8abcdef", 0);

        assert_eq!(
            store.update_system(&r).await,
            Err(StoreError::NotFound("84cca8abcdef".into()))
        );

        store.create_or_replace_system(&r).await.unwrap();
        store.update_system(&r).await.unwrap();
        assert_eq!(store.get_all_systems().await.unwrap().len(), 1);

        store.delete_system("84cca8abcdef").await.unwrap();
        assert!(store.get_system("84cca8abcdef").await.is_err());
    }

    #[tokio::test]
    async fn test_stale_save_is_ignored() {
        let store = MemoryStore::default();
        let stale = record("84cca8abcdef", 0);
        let mut fresh = stale.clone();
        fresh.announcement.channel = 6;
        fresh.updated_at = stale.updated_at + 1;

        store.create_or_replace_system(&fresh).await.unwrap();
        store.update_system(&stale).await.unwrap();
        store.create_or_replace_system(&stale).await.unwrap();

        let saved = store.get_system("84cca8abcdef").await.unwrap();
        assert_eq!(saved.announcement.channel, 6);
    }

    #[tokio::test]
    async fn test_coordinator_must_be_unique() {
        let store = MemoryStore::default();
        assert_eq!(store.get_coordinator().await, Err(StoreError::NoCoordinator));

        store.create_or_replace_system(&record("000000000001", 6)).await.unwrap();
        store.create_or_replace_system(&record("000000000002", 0)).await.unwrap();
        assert_eq!(
            store.get_coordinator().await.unwrap().identifier,
            "000000000001"
        );

        store.create_or_replace_system(&record("000000000003", 11)).await.unwrap();
        assert_eq!(store.get_coordinator().await, Err(StoreError::NoCoordinator));
    }
}
