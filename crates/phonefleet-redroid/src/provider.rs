//! Redroid provider implementation

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::container::{
    LABEL_PROVIDER, RedroidConfig, adb_port, container_name, device_to_container_config,
    map_state, new_suffix, ports_in_use,
};
use crate::error::{RedroidError, docker_error};
use crate::port::PortAllocator;
use crate::waiter::wait_for_adb;
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::ContainerInspectResponse;
use chrono::Utc;
use phonefleet_provider::{
    Adb, AdbControl, AdbEndpoint, AppManagement, CaptureFormat, ConnectionInfo,
    DeviceCapabilities, DeviceCreateConfig, DeviceProperties, DeviceProvider, DeviceStatus,
    FileTransferControl, InputControl, MediaCapture, ProviderDevice, ProviderType, Resolution,
    Result, SerialResolver,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Docker 接続を初期化
pub fn connect_docker(docker_host: Option<&str>) -> crate::error::Result<Docker> {
    let docker = match docker_host {
        Some(host) if host.starts_with("unix://") => {
            Docker::connect_with_unix(host, 120, bollard::API_DEFAULT_VERSION)
        }
        Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
        }
        Some(host) => {
            return Err(RedroidError::ConfigError(format!(
                "unsupported docker host: {}",
                host
            )));
        }
        None => Docker::connect_with_local_defaults(),
    };
    docker.map_err(|e| RedroidError::DockerConnectionFailed(e.to_string()))
}

async fn inspect(docker: &Docker, device_id: &str) -> Result<ContainerInspectResponse> {
    docker
        .inspect_container(
            device_id,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
        .map_err(|e| docker_error(device_id, e).into())
}

/// Resolves a container name to `adb_host:<bound port>`
struct ContainerSerials {
    docker: Docker,
    adb_host: String,
}

#[async_trait]
impl SerialResolver for ContainerSerials {
    async fn resolve_serial(&self, device_id: &str) -> Result<String> {
        let info = inspect(&self.docker, device_id).await?;
        let port = adb_port(&info).ok_or_else(|| RedroidError::MissingAdbPort {
            container: device_id.to_string(),
        })?;
        Ok(AdbEndpoint::new(&self.adb_host, port).serial)
    }
}

/// Redroid provider: one privileged container per device
///
/// The device id is the container name (`phonefleet-redroid-<id>`).
pub struct RedroidProvider {
    docker: Docker,
    config: RedroidConfig,
    ports: PortAllocator,
    control: AdbControl,
    capabilities: DeviceCapabilities,
}

impl RedroidProvider {
    pub fn new(docker: Docker, config: RedroidConfig, adb: Adb) -> Self {
        let resolver = Arc::new(ContainerSerials {
            docker: docker.clone(),
            adb_host: config.adb_host.clone(),
        });
        Self {
            ports: PortAllocator::new(config.port_range),
            control: AdbControl::new(adb, resolver),
            capabilities: Self::build_capabilities(),
            docker,
            config,
        }
    }

    /// Docker に接続してプロバイダを作成
    pub fn connect(config: RedroidConfig, adb: Adb) -> crate::error::Result<Self> {
        let docker = connect_docker(config.docker_host.as_deref())?;
        Ok(Self::new(docker, config, adb))
    }

    fn build_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            supports_adb: true,
            supports_screen_capture: true,
            supported_capture_formats: vec![CaptureFormat::Screencap, CaptureFormat::Scrcpy],
            max_resolution: Some(Resolution {
                width: 1920,
                height: 1080,
            }),
            supports_touch_control: true,
            supports_keyboard_input: true,
            supports_file_transfer: true,
            supports_app_install: true,
            supports_screenshot: true,
            supports_recording: true,
            supports_location_mocking: true,
            supports_rotation: true,
            ..Default::default()
        }
    }

    fn endpoint(&self, device_id: &str, info: &ContainerInspectResponse) -> Result<AdbEndpoint> {
        let port = adb_port(info).ok_or_else(|| RedroidError::MissingAdbPort {
            container: device_id.to_string(),
        })?;
        Ok(AdbEndpoint::new(&self.config.adb_host, port))
    }

    async fn used_ports(&self) -> Result<std::collections::HashSet<u16>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=redroid", LABEL_PROVIDER)],
        );
        let options = bollard::container::ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(RedroidError::from)?;
        Ok(ports_in_use(&containers, self.config.port_range))
    }

    async fn create_container(
        &self,
        name: &str,
        config: &DeviceCreateConfig,
        host_port: u16,
    ) -> Result<()> {
        let (container_config, options) =
            device_to_container_config(name, config, &self.config, host_port);
        let image = container_config.image.clone().unwrap_or_default();

        match self
            .docker
            .create_container(Some(options), container_config)
            .await
        {
            Ok(response) => {
                tracing::debug!(container = name, id = %response.id, "Container created");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RedroidError::ImageNotFound { image }.into()),
            Err(e) => Err(RedroidError::from(e).into()),
        }
    }
}

#[async_trait]
impl DeviceProvider for RedroidProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Redroid
    }

    async fn create(&self, config: &DeviceCreateConfig) -> Result<ProviderDevice> {
        let name = container_name(&new_suffix());
        let in_use = self.used_ports().await?;
        let host_port = self.ports.allocate(&in_use)?;

        tracing::info!(device_id = %name, host_port, "Creating Redroid container");
        let created = self.create_container(&name, config, host_port).await;
        self.ports.release(host_port);
        created?;

        let android_version = config
            .android_version
            .clone()
            .unwrap_or_else(|| "11".to_string());
        let mut provider_config = HashMap::new();
        provider_config.insert("host_port".to_string(), serde_json::json!(host_port));

        Ok(ProviderDevice {
            id: name.clone(),
            name: config.name.clone(),
            // コンテナは作成直後は停止状態
            status: DeviceStatus::Stopped,
            connection_info: ConnectionInfo::Redroid {
                adb: AdbEndpoint::new(&self.config.adb_host, host_port),
            },
            properties: DeviceProperties {
                manufacturer: "Redroid".to_string(),
                model: format!("Redroid-{}", android_version),
                android_version,
                serial_number: Some(AdbEndpoint::new(&self.config.adb_host, host_port).serial),
                resolution: Some(config.resolution_string()),
                dpi: config.dpi,
                custom: HashMap::new(),
            },
            created_at: Utc::now(),
            provider_config,
        })
    }

    async fn start(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Starting Redroid container");
        match self
            .docker
            .start_container(
                device_id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
        {
            Ok(_) => {}
            // 既に起動中
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(docker_error(device_id, e).into()),
        }

        let info = inspect(&self.docker, device_id).await?;
        let endpoint = self.endpoint(device_id, &info)?;
        wait_for_adb(
            self.control.adb(),
            &endpoint.serial,
            self.config.adb_ready_timeout,
        )
        .await?;
        tracing::info!(device_id, serial = %endpoint.serial, "ADB connection ready");
        Ok(())
    }

    async fn stop(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Stopping Redroid container");
        if let Ok(info) = inspect(&self.docker, device_id).await
            && let Ok(endpoint) = self.endpoint(device_id, &info)
        {
            let _ = self.control.adb().disconnect(&endpoint.serial).await;
        }

        match self
            .docker
            .stop_container(
                device_id,
                None::<bollard::query_parameters::StopContainerOptions>,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                tracing::debug!(device_id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(docker_error(device_id, e).into()),
        }
    }

    async fn destroy(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Destroying Redroid container");
        if let Err(e) = self.stop(device_id).await {
            tracing::debug!(device_id, error = %e, "Stop before removal failed");
        }

        match self
            .docker
            .remove_container(
                device_id,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            // コンテナが存在しない場合は削除済みとみなす
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(RedroidError::from(e).into()),
        }
    }

    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        let info = inspect(&self.docker, device_id).await?;
        let status = map_state(info.state.as_ref());
        tracing::debug!(
            device_id,
            raw_status = ?info.state.as_ref().and_then(|s| s.status.as_ref()),
            status = %status,
            "Redroid container status"
        );
        Ok(status)
    }

    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo> {
        let info = inspect(&self.docker, device_id).await?;
        Ok(ConnectionInfo::Redroid {
            adb: self.endpoint(device_id, &info)?,
        })
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn get_properties(&self, device_id: &str) -> Result<DeviceProperties> {
        let info = inspect(&self.docker, device_id).await?;
        let endpoint = self.endpoint(device_id, &info)?;
        let adb = self.control.adb();
        let serial = endpoint.serial.as_str();

        let prop = |name: &'static str, fallback: &'static str| async move {
            adb.getprop(serial, name)
                .await
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        let mut custom = HashMap::new();
        custom.insert("container".to_string(), device_id.to_string());
        if let Some(image) = info.config.as_ref().and_then(|c| c.image.clone()) {
            custom.insert("image".to_string(), image);
        }
        if let Ok(sdk) = adb.getprop(serial, "ro.build.version.sdk").await {
            custom.insert("sdk".to_string(), sdk);
        }

        Ok(DeviceProperties {
            manufacturer: prop("ro.product.manufacturer", "Redroid").await,
            model: prop("ro.product.model", "Redroid Virtual Device").await,
            android_version: prop("ro.build.version.release", "11").await,
            serial_number: Some(endpoint.serial.clone()),
            resolution: None,
            dpi: None,
            custom,
        })
    }

    async fn reboot(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Restarting Redroid container");
        self.docker
            .restart_container(
                device_id,
                None::<bollard::query_parameters::RestartContainerOptions>,
            )
            .await
            .map_err(|e| docker_error(device_id, e))?;
        Ok(())
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
