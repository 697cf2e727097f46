//! JSON file device store
//!
//! Keeps every device in one state file. The previous file is renamed to
//! `<file>.backup` before each write.

use crate::device::{Device, DeviceFilter, FieldUpdate};
use crate::error::{ControlPlaneError, Result};
use crate::repository::DeviceRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phonefleet_provider::{ConnectionInfo, DeviceStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    updated_at: DateTime<Utc>,
    devices: HashMap<String, Device>,
}

/// File-backed [`DeviceRepository`]
///
/// Records are loaded once at open and served from memory; every `save`
/// rewrites the file while holding the write lock.
pub struct FileDeviceRepository {
    path: PathBuf,
    devices: RwLock<HashMap<String, Device>>,
}

impl FileDeviceRepository {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let devices = Self::load(&path).await?;
        tracing::debug!(path = %path.display(), devices = devices.len(), "Opened device store");
        Ok(Self {
            path,
            devices: RwLock::new(devices),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    async fn load(path: &Path) -> Result<HashMap<String, Device>> {
        if !fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "Store file not found, starting empty");
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await?;
        let file: StoreFile = serde_json::from_str(&content)?;
        if file.version > STORE_VERSION {
            return Err(ControlPlaneError::Store(format!(
                "store file version {} is newer than supported version {}",
                file.version, STORE_VERSION
            )));
        }
        Ok(file.devices)
    }

    async fn write(&self, devices: &HashMap<String, Device>) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }

        if fs::try_exists(&self.path).await? {
            fs::rename(&self.path, self.backup_path()).await?;
        }

        let file = StoreFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            devices: devices.clone(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?).await?;
        Ok(())
    }

    /// Apply a change to the current record under the write lock
    ///
    /// The file is rewritten only when the field actually changed.
    async fn update_field<T: Send, P: Send>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Device) -> FieldUpdate<T, P> + Send,
    ) -> Result<FieldUpdate<T, P>> {
        let mut devices = self.devices.write().await;
        let Some(mut device) = devices.get(id).cloned() else {
            return Ok(FieldUpdate::Missing);
        };
        let update = apply(&mut device);
        if !update.is_updated() {
            return Ok(update);
        }

        let previous = devices.insert(id.to_string(), device);
        if let Err(e) = self.write(&devices).await {
            if let Some(prev) = previous {
                devices.insert(id.to_string(), prev);
            }
            return Err(e);
        }
        tracing::debug!(device_id = %id, "Updated device field");
        Ok(update)
    }
}

#[async_trait]
impl DeviceRepository for FileDeviceRepository {
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
        let mut devices = self.devices.write().await;
        let previous = devices.insert(device.id.clone(), device.clone());
        if let Err(e) = self.write(&devices).await {
            // 書き込みに失敗したらメモリ上も戻す
            match previous {
                Some(prev) => devices.insert(prev.id.clone(), prev),
                None => devices.remove(&device.id),
            };
            return Err(e);
        }
        tracing::debug!(device_id = %device.id, "Saved device");
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeviceStatus,
    ) -> Result<FieldUpdate<DeviceStatus>> {
        self.update_field(id, |d| d.apply_status(status)).await
    }

    async fn update_connection_info(
        &self,
        id: &str,
        fresh: ConnectionInfo,
    ) -> Result<FieldUpdate<ConnectionInfo, Option<ConnectionInfo>>> {
        self.update_field(id, |d| d.apply_connection_info(fresh))
            .await
    }
}
