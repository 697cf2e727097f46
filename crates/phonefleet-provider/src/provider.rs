//! Device provider trait definition

use crate::error::{ProviderError, Result};
use crate::types::{
    AppInstallOptions, ConnectionInfo, DeviceCapabilities, DeviceCreateConfig, DeviceProperties,
    DeviceSnapshot, DeviceStatus, FileTransfer, KeyEvent, ProviderDevice, ProviderType,
    SwipeEvent, TextInput, TouchEvent,
};
use async_trait::async_trait;

/// Device provider abstraction trait
///
/// All backends (Redroid, Huawei CPH, Aliyun ECP, physical pool) implement
/// this trait to provide a uniform device lifecycle. Optional features are
/// exposed through the capability accessors at the bottom; an adapter that
/// returns `None` does not support that feature.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Returns the provider type this adapter serves
    fn provider_type(&self) -> ProviderType;

    /// Provision a new device
    async fn create(&self, config: &DeviceCreateConfig) -> Result<ProviderDevice>;

    /// Start a stopped device
    async fn start(&self, device_id: &str) -> Result<()>;

    /// Stop a running device
    async fn stop(&self, device_id: &str) -> Result<()>;

    /// Release the device and every backend resource held for it
    async fn destroy(&self, device_id: &str) -> Result<()>;

    /// Fetch the authoritative status, mapped onto [`DeviceStatus`]
    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus>;

    /// Fetch fresh connection information / credentials
    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo>;

    /// Static capability declaration, computed once per adapter
    fn capabilities(&self) -> &DeviceCapabilities;

    async fn get_properties(&self, _device_id: &str) -> Result<DeviceProperties> {
        Err(ProviderError::not_supported(
            self.provider_type(),
            "get_properties",
        ))
    }

    async fn reboot(&self, _device_id: &str) -> Result<()> {
        Err(ProviderError::not_supported(self.provider_type(), "reboot"))
    }

    fn input(&self) -> Option<&dyn InputControl> {
        None
    }

    fn files(&self) -> Option<&dyn FileTransferControl> {
        None
    }

    fn apps(&self) -> Option<&dyn AppManagement> {
        None
    }

    fn media(&self) -> Option<&dyn MediaCapture> {
        None
    }

    fn snapshots(&self) -> Option<&dyn SnapshotManagement> {
        None
    }
}

/// Touch, swipe, key and text input
#[async_trait]
pub trait InputControl: Send + Sync {
    async fn send_touch(&self, device_id: &str, event: TouchEvent) -> Result<()>;
    async fn send_swipe(&self, device_id: &str, event: SwipeEvent) -> Result<()>;
    async fn send_key(&self, device_id: &str, event: KeyEvent) -> Result<()>;
    async fn input_text(&self, device_id: &str, input: &TextInput) -> Result<()>;
}

/// File push / pull
#[async_trait]
pub trait FileTransferControl: Send + Sync {
    async fn push_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()>;
    async fn pull_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()>;
}

/// Application install / uninstall
#[async_trait]
pub trait AppManagement: Send + Sync {
    /// Returns the installed package name when known
    async fn install_app(&self, device_id: &str, options: &AppInstallOptions) -> Result<String>;
    async fn uninstall_app(&self, device_id: &str, package_name: &str) -> Result<()>;
}

/// Screenshots and screen recording
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// PNG bytes
    async fn take_screenshot(&self, device_id: &str) -> Result<Vec<u8>>;
    /// Returns a recording id to pass to [`MediaCapture::stop_recording`]
    async fn start_recording(&self, device_id: &str, max_duration_secs: Option<u32>)
    -> Result<String>;
    /// MP4 bytes
    async fn stop_recording(&self, device_id: &str, recording_id: &str) -> Result<Vec<u8>>;
}

/// Snapshot lifecycle
#[async_trait]
pub trait SnapshotManagement: Send + Sync {
    async fn create_snapshot(&self, device_id: &str, name: &str) -> Result<DeviceSnapshot>;
    async fn restore_snapshot(&self, device_id: &str, snapshot_id: &str) -> Result<()>;
    async fn list_snapshots(&self, device_id: &str) -> Result<Vec<DeviceSnapshot>>;
    async fn delete_snapshot(&self, device_id: &str, snapshot_id: &str) -> Result<()>;
}

/// Capability-checked access to the optional interfaces
///
/// Each accessor returns [`ProviderError::NotSupported`] when the adapter
/// either does not implement the interface or declares the capability off.
impl dyn DeviceProvider {
    pub fn input_control(&self) -> Result<&dyn InputControl> {
        let caps = self.capabilities();
        match self.input() {
            Some(input) if caps.supports_touch_control || caps.supports_keyboard_input => {
                Ok(input)
            }
            _ => Err(ProviderError::not_supported(self.provider_type(), "input")),
        }
    }

    pub fn file_transfer(&self) -> Result<&dyn FileTransferControl> {
        match self.files() {
            Some(files) if self.capabilities().supports_file_transfer => Ok(files),
            _ => Err(ProviderError::not_supported(
                self.provider_type(),
                "file_transfer",
            )),
        }
    }

    pub fn app_management(&self) -> Result<&dyn AppManagement> {
        match self.apps() {
            Some(apps) if self.capabilities().supports_app_install => Ok(apps),
            _ => Err(ProviderError::not_supported(
                self.provider_type(),
                "app_management",
            )),
        }
    }

    pub fn media_capture(&self) -> Result<&dyn MediaCapture> {
        let caps = self.capabilities();
        match self.media() {
            Some(media) if caps.supports_screenshot || caps.supports_recording => Ok(media),
            _ => Err(ProviderError::not_supported(
                self.provider_type(),
                "media_capture",
            )),
        }
    }

    pub fn snapshot_management(&self) -> Result<&dyn SnapshotManagement> {
        match self.snapshots() {
            Some(snapshots) if self.capabilities().supports_snapshot => Ok(snapshots),
            _ => Err(ProviderError::not_supported(
                self.provider_type(),
                "snapshot",
            )),
        }
    }
}
