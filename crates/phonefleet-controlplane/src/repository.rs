//! Device repository contract and in-memory store

use crate::device::{Device, DeviceFilter, FieldUpdate};
use crate::error::Result;
use async_trait::async_trait;
use phonefleet_provider::{ConnectionInfo, DeviceStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Persistence seam for device records
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find(&self, filter: &DeviceFilter) -> Result<Vec<Device>>;
    async fn find_one(&self, id: &str) -> Result<Option<Device>>;
    /// Insert or replace by `id`
    async fn save(&self, device: &Device) -> Result<()>;

    /// Rewrite `status` of the current record, leaving every other field as stored
    async fn update_status(
        &self,
        id: &str,
        status: DeviceStatus,
    ) -> Result<FieldUpdate<DeviceStatus>>;

    /// Combine `fresh` with the current record's connection info and rewrite only that field
    async fn update_connection_info(
        &self,
        id: &str,
        fresh: ConnectionInfo,
    ) -> Result<FieldUpdate<ConnectionInfo, Option<ConnectionInfo>>>;
}

/// In-memory repository
///
/// Counts `save` calls so callers can assert that a cycle wrote nothing.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRepository {
    devices: RwLock<HashMap<String, Device>>,
    saves: AtomicUsize,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records without counting them as saves
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().map(|d| (d.id.clone(), d)).collect()),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn find(&self, filter: &DeviceFilter) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        let mut found: Vec<Device> = devices
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn find_one(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn save(&self, device: &Device) -> Result<()> {
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeviceStatus,
    ) -> Result<FieldUpdate<DeviceStatus>> {
        Ok(self.update_field(id, |d| d.apply_status(status)).await)
    }

    async fn update_connection_info(
        &self,
        id: &str,
        fresh: ConnectionInfo,
    ) -> Result<FieldUpdate<ConnectionInfo, Option<ConnectionInfo>>> {
        Ok(self
            .update_field(id, |d| d.apply_connection_info(fresh))
            .await)
    }
}

impl InMemoryDeviceRepository {
    async fn update_field<T, P>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Device) -> FieldUpdate<T, P>,
    ) -> FieldUpdate<T, P> {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(id) else {
            return FieldUpdate::Missing;
        };
        let update = apply(device);
        if update.is_updated() {
            self.saves.fetch_add(1, Ordering::SeqCst);
        }
        update
    }
}
