//! Physical device provider implementation

use crate::error::PhysicalError;
use crate::pool::DevicePool;
use async_trait::async_trait;
use chrono::Utc;
use phonefleet_provider::{
    Adb, AdbControl, AppManagement, CaptureFormat, ConnectionInfo, DeviceCapabilities,
    DeviceCreateConfig, DeviceProperties, DeviceProvider, DeviceStatus, ErrorKind,
    FileTransferControl, InputControl, MediaCapture, ProviderDevice, ProviderType, Result,
    SerialResolver,
};
use std::collections::HashMap;
use std::sync::Arc;

/// `adb get-state` の出力を DeviceStatus に変換
pub fn map_adb_state(state: &str) -> DeviceStatus {
    match state.trim() {
        "device" => DeviceStatus::Running,
        "offline" => DeviceStatus::Stopped,
        _ => DeviceStatus::Error,
    }
}

/// Resolves an allocated pool serial to the serial adb uses
struct PoolSerials {
    pool: Arc<DevicePool>,
}

#[async_trait]
impl SerialResolver for PoolSerials {
    async fn resolve_serial(&self, device_id: &str) -> Result<String> {
        if !self.pool.is_allocated(device_id) {
            return Err(PhysicalError::NotAllocated(device_id.to_string()).into());
        }
        Ok(self.pool.get(device_id)?.adb_serial())
    }
}

/// Physical device provider
///
/// The device id is the hardware serial of the pool entry. `create` and
/// `destroy` only move devices in and out of the pool; the hardware itself
/// is never provisioned.
pub struct PhysicalProvider {
    pool: Arc<DevicePool>,
    control: AdbControl,
    capabilities: DeviceCapabilities,
}

impl PhysicalProvider {
    pub fn new(pool: DevicePool, adb: Adb) -> Self {
        let pool = Arc::new(pool);
        let resolver = Arc::new(PoolSerials { pool: pool.clone() });
        Self {
            pool,
            control: AdbControl::new(adb, resolver),
            capabilities: Self::build_capabilities(),
        }
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    fn build_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            supports_adb: true,
            supports_screen_capture: true,
            supported_capture_formats: vec![CaptureFormat::Screencap, CaptureFormat::Scrcpy],
            supports_touch_control: true,
            supports_keyboard_input: true,
            supports_file_transfer: true,
            supports_app_install: true,
            supports_screenshot: true,
            supports_recording: true,
            supports_rotation: true,
            supports_camera: true,
            supports_microphone: true,
            ..Default::default()
        }
    }

    fn allocated_serial(&self, device_id: &str) -> Result<String> {
        if !self.pool.is_allocated(device_id) {
            return Err(PhysicalError::NotAllocated(device_id.to_string()).into());
        }
        Ok(self.pool.get(device_id)?.adb_serial())
    }
}

#[async_trait]
impl DeviceProvider for PhysicalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Physical
    }

    async fn create(&self, config: &DeviceCreateConfig) -> Result<ProviderDevice> {
        let device = self.pool.allocate(
            config.option("serial"),
            &config.name,
            config.user_id.as_deref(),
        )?;
        tracing::info!(
            device_id = %device.serial,
            available = self.pool.available(),
            "Allocated physical device"
        );

        let mut provider_config = HashMap::new();
        provider_config.insert(
            "transport".to_string(),
            serde_json::json!(if device.is_network() { "tcp" } else { "usb" }),
        );

        Ok(ProviderDevice {
            id: device.serial.clone(),
            name: config.name.clone(),
            // 接続するまでは停止扱い
            status: DeviceStatus::Stopped,
            connection_info: ConnectionInfo::Physical {
                adb: device.endpoint(),
            },
            properties: DeviceProperties {
                manufacturer: String::new(),
                model: device.model.clone().unwrap_or_default(),
                android_version: config.android_version.clone().unwrap_or_default(),
                serial_number: Some(device.serial.clone()),
                resolution: None,
                dpi: None,
                custom: HashMap::new(),
            },
            created_at: Utc::now(),
            provider_config,
        })
    }

    async fn start(&self, device_id: &str) -> Result<()> {
        let device = self.pool.get(device_id)?.clone();
        self.allocated_serial(device_id)?;
        // USB 接続の端末は connect 不要
        if device.is_network() {
            tracing::info!(device_id, serial = %device.adb_serial(), "Connecting physical device");
            self.control.adb().connect(&device.adb_serial()).await?;
        }
        Ok(())
    }

    async fn stop(&self, device_id: &str) -> Result<()> {
        let device = self.pool.get(device_id)?.clone();
        self.allocated_serial(device_id)?;
        if device.is_network() {
            tracing::info!(device_id, "Disconnecting physical device");
            self.control.adb().disconnect(&device.adb_serial()).await?;
        }
        Ok(())
    }

    async fn destroy(&self, device_id: &str) -> Result<()> {
        let device = self.pool.get(device_id)?.clone();
        if device.is_network()
            && let Err(e) = self.control.adb().disconnect(&device.adb_serial()).await
        {
            tracing::debug!(device_id, error = %e, "Disconnect before release failed");
        }
        if self.pool.release(device_id) {
            tracing::info!(device_id, "Released physical device");
        }
        Ok(())
    }

    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        self.pool.get(device_id)?;
        if !self.pool.is_allocated(device_id) {
            return Ok(DeviceStatus::Destroyed);
        }
        let serial = self.allocated_serial(device_id)?;
        match self.control.adb().get_state(&serial).await {
            Ok(state) => {
                let status = map_adb_state(&state);
                tracing::debug!(device_id, raw_status = %state, status = %status, "Physical device status");
                Ok(status)
            }
            // 切断済みの端末は adb が "not found" で失敗する
            Err(e) if e.kind() == ErrorKind::Backend => {
                tracing::debug!(device_id, error = %e, "Device not visible to adb");
                Ok(DeviceStatus::Stopped)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo> {
        Ok(ConnectionInfo::Physical {
            adb: self.pool.get(device_id)?.endpoint(),
        })
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn get_properties(&self, device_id: &str) -> Result<DeviceProperties> {
        let serial = self.allocated_serial(device_id)?;
        let adb = self.control.adb();
        let serial = serial.as_str();

        let mut custom = HashMap::new();
        if let Ok(sdk) = adb.getprop(serial, "ro.build.version.sdk").await {
            custom.insert("sdk".to_string(), sdk);
        }

        Ok(DeviceProperties {
            manufacturer: adb.getprop(serial, "ro.product.manufacturer").await?,
            model: adb.getprop(serial, "ro.product.model").await?,
            android_version: adb.getprop(serial, "ro.build.version.release").await?,
            serial_number: Some(device_id.to_string()),
            resolution: None,
            dpi: adb
                .getprop(serial, "ro.sf.lcd_density")
                .await
                .ok()
                .and_then(|v| v.parse().ok()),
            custom,
        })
    }

    async fn reboot(&self, device_id: &str) -> Result<()> {
        let serial = self.allocated_serial(device_id)?;
        tracing::info!(device_id, "Rebooting physical device");
        self.control.adb().reboot(&serial).await
    }

    fn input(&self) -> Option<&dyn InputControl> {
        Some(&self.control)
    }

    fn files(&self) -> Option<&dyn FileTransferControl> {
        Some(&self.control)
    }

    fn apps(&self) -> Option<&dyn AppManagement> {
        Some(&self.control)
    }

    fn media(&self) -> Option<&dyn MediaCapture> {
        Some(&self.control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PhysicalDevice;

    fn provider() -> PhysicalProvider {
        let pool = DevicePool::new(vec![
            PhysicalDevice::network("R58M1", "10.0.0.5", 5555),
            PhysicalDevice::usb("emulator-5554"),
        ])
        .unwrap();
        PhysicalProvider::new(pool, Adb::new("/nonexistent/adb"))
    }

    #[test]
    fn test_map_adb_state() {
        assert_eq!(map_adb_state("device\n"), DeviceStatus::Running);
        assert_eq!(map_adb_state("offline"), DeviceStatus::Stopped);
        assert_eq!(map_adb_state("bootloader"), DeviceStatus::Error);
        assert_eq!(map_adb_state("unauthorized"), DeviceStatus::Error);
    }

    #[tokio::test]
    async fn test_create_allocates_requested_device() {
        let provider = provider();
        let mut config = DeviceCreateConfig::new("qa-phone");
        config
            .provider_options
            .insert("serial".into(), "emulator-5554".into());

        let device = provider.create(&config).await.unwrap();
        assert_eq!(device.id, "emulator-5554");
        assert_eq!(device.status, DeviceStatus::Stopped);
        assert_eq!(device.connection_info.provider_type(), ProviderType::Physical);
        assert!(provider.pool().is_allocated("emulator-5554"));
    }

    #[tokio::test]
    async fn test_destroy_releases_and_reports_destroyed() {
        let provider = provider();
        // USB 端末なので adb 呼び出しなしで完結する
        let mut config = DeviceCreateConfig::new("qa-phone");
        config
            .provider_options
            .insert("serial".into(), "emulator-5554".into());
        provider.create(&config).await.unwrap();

        provider.destroy("emulator-5554").await.unwrap();
        assert!(!provider.pool().is_allocated("emulator-5554"));
        assert_eq!(
            provider.get_status("emulator-5554").await.unwrap(),
            DeviceStatus::Destroyed
        );
    }

    #[tokio::test]
    async fn test_unreachable_adb_reads_as_stopped() {
        let provider = provider();
        provider.create(&DeviceCreateConfig::new("a")).await.unwrap();
        // adb バイナリが無い場合も Backend エラーになる
        assert_eq!(
            provider.get_status("R58M1").await.unwrap(),
            DeviceStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_unknown_device_is_terminal() {
        let provider = provider();
        let err = provider.get_status("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Terminal);

        let err = provider.reboot("R58M1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Terminal);
    }

    #[tokio::test]
    async fn test_capabilities_expose_adb_interfaces() {
        let provider: Box<dyn DeviceProvider> = Box::new(provider());
        assert!(provider.input_control().is_ok());
        assert!(provider.media_capture().is_ok());
        assert!(provider.snapshot_management().is_err());
    }
}
