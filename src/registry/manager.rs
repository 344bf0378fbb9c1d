//! Registry of every known garden system

use super::store::SystemStore;
use crate::error::{GatewayError, Result};
use garden_shared::{Announcement, DeviceRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Owns all device records behind one lock.
///
/// Callers receive copies. Mutation goes through [`DeviceRegistry::update`],
/// so nobody observes a record halfway through a change.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Hydrate from the store, replacing anything held so far
    pub async fn load_from(&self, store: &dyn SystemStore) -> Result<usize> {
        let records = store.get_all_systems().await?;
        let count = records.len();

        let mut devices = self.devices.write().await;
        devices.clear();
        for record in records {
            devices.insert(record.identifier.clone(), record);
        }

        Ok(count)
    }

    /// Insert or wholesale replace a record
    pub async fn upsert(&self, record: DeviceRecord) {
        let mut devices = self.devices.write().await;
        devices.insert(record.identifier.clone(), record);
    }

    /// Register an announcement. A known system keeps its readings and
    /// creation time; only the announcement and update status change.
    pub async fn announce(&self, id: &str, announcement: Announcement) -> DeviceRecord {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(record) => {
                record.reannounce(announcement);
                record.clone()
            }
            None => {
                let record = DeviceRecord::from_announcement(id, announcement);
                devices.insert(id.to_string(), record.clone());
                record
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<DeviceRecord> {
        let devices = self.devices.read().await;
        devices.get(id).cloned()
    }

    /// All records, ordered by identifier
    pub async fn get_all(&self) -> Vec<DeviceRecord> {
        let devices = self.devices.read().await;
        let mut all: Vec<DeviceRecord> = devices.values().cloned().collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        all
    }

    /// The unique coordinator. Zero or several candidates is an error.
    pub async fn coordinator(&self) -> Result<DeviceRecord> {
        let devices = self.devices.read().await;
        let mut candidates = devices.values().filter(|r| r.is_coordinator());

        match (candidates.next(), candidates.next()) {
            (Some(record), None) => Ok(record.clone()),
            (None, _) => Err(GatewayError::NotFound("no coordinator registered".into())),
            (Some(_), Some(_)) => Err(GatewayError::NotFound(
                "more than one coordinator registered".into(),
            )),
        }
    }

    pub async fn delete(&self, id: &str) -> Option<DeviceRecord> {
        let mut devices = self.devices.write().await;
        devices.remove(id)
    }

    /// Apply `f` under the lock and return a copy of the result
    pub async fn update<F>(&self, id: &str, f: F) -> Option<DeviceRecord>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut devices = self.devices.write().await;
        let record = devices.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
