//! DeviceCreateConfig から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::port::PortRange;
use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{
    ContainerInspectResponse, ContainerState, ContainerStateStatusEnum, ContainerSummary,
    HostConfig, PortBinding,
};
use phonefleet_provider::{DeviceCreateConfig, DeviceStatus, Resolution};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const NAME_PREFIX: &str = "phonefleet-redroid-";
pub const ADB_CONTAINER_PORT: &str = "5555/tcp";

pub const LABEL_MANAGED: &str = "phonefleet.managed";
pub const LABEL_PROVIDER: &str = "phonefleet.provider";
pub const LABEL_DEVICE_NAME: &str = "phonefleet.device-name";
pub const LABEL_USER: &str = "phonefleet.user";
pub const LABEL_ADB_PORT: &str = "phonefleet.adb-port";

const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 1080,
    height: 1920,
};
const DEFAULT_DPI: u32 = 320;

/// Redroid backend settings
#[derive(Debug, Clone)]
pub struct RedroidConfig {
    /// `unix:///var/run/docker.sock`, `tcp://host:2375`, or `None` for local defaults
    pub docker_host: Option<String>,
    pub image: String,
    /// Host the bound ADB ports are reachable on
    pub adb_host: String,
    pub port_range: PortRange,
    pub network: Option<String>,
    pub enable_audio: bool,
    pub adb_ready_timeout: Duration,
}

impl Default for RedroidConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            image: "redroid/redroid:11.0.0-latest".to_string(),
            adb_host: "127.0.0.1".to_string(),
            port_range: PortRange::default(),
            network: None,
            enable_audio: true,
            adb_ready_timeout: Duration::from_secs(30),
        }
    }
}

/// コンテナ名（= デバイスID）を生成
pub fn container_name(suffix: &str) -> String {
    format!("{}{}", NAME_PREFIX, suffix)
}

/// 新しいデバイスIDのサフィックス
pub fn new_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// DeviceCreateConfig を Redroid コンテナの設定に変換
pub fn device_to_container_config(
    name: &str,
    device: &DeviceCreateConfig,
    redroid: &RedroidConfig,
    host_port: u16,
) -> (Config<String>, CreateContainerOptions<String>) {
    let image = device
        .option("image")
        .map(|s| s.to_string())
        .unwrap_or_else(|| redroid.image.clone());
    let resolution = device.resolution.unwrap_or(DEFAULT_RESOLUTION);
    let dpi = device.dpi.unwrap_or(DEFAULT_DPI);

    // redroid はブート引数で画面設定を受け取る
    let cmd = vec![
        format!("androidboot.redroid_width={}", resolution.width),
        format!("androidboot.redroid_height={}", resolution.height),
        format!("androidboot.redroid_dpi={}", dpi),
    ];

    let mut env = Vec::new();
    if redroid.enable_audio {
        env.push("REDROID_AUDIO=1".to_string());
    }

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(ADB_CONTAINER_PORT.to_string(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        ADB_CONTAINER_PORT.to_string(),
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(host_port.to_string()),
        }]),
    );

    let host_config = Some(HostConfig {
        privileged: Some(true),
        port_bindings: Some(port_bindings),
        memory: (device.memory_mb > 0).then(|| i64::from(device.memory_mb) * 1024 * 1024),
        nano_cpus: (device.cpu_cores > 0).then(|| i64::from(device.cpu_cores) * 1_000_000_000),
        network_mode: redroid.network.clone(),
        ..Default::default()
    });

    let mut labels = HashMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    labels.insert(LABEL_PROVIDER.to_string(), "redroid".to_string());
    labels.insert(LABEL_DEVICE_NAME.to_string(), device.name.clone());
    labels.insert(LABEL_ADB_PORT.to_string(), host_port.to_string());
    if let Some(user_id) = &device.user_id {
        labels.insert(LABEL_USER.to_string(), user_id.clone());
    }

    let config = Config {
        image: Some(image),
        env: Some(env),
        cmd: Some(cmd),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: name.to_string(),
        platform: None,
    };

    (config, options)
}

/// Docker のコンテナ状態を DeviceStatus に変換
pub fn map_state(state: Option<&ContainerState>) -> DeviceStatus {
    match state.and_then(|s| s.status.as_ref()) {
        Some(ContainerStateStatusEnum::CREATED) | Some(ContainerStateStatusEnum::RESTARTING) => {
            DeviceStatus::Creating
        }
        Some(ContainerStateStatusEnum::RUNNING) => DeviceStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) | Some(ContainerStateStatusEnum::EXITED) => {
            DeviceStatus::Stopped
        }
        Some(ContainerStateStatusEnum::REMOVING) => DeviceStatus::Destroying,
        _ => DeviceStatus::Error,
    }
}

/// ADB のホストポート
///
/// HostConfig のバインドは停止中も残るので先に見る。
pub fn adb_port(info: &ContainerInspectResponse) -> Option<u16> {
    let from_bindings = |bindings: Option<&HashMap<String, Option<Vec<PortBinding>>>>| {
        bindings?
            .get(ADB_CONTAINER_PORT)?
            .as_ref()?
            .iter()
            .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())
    };

    from_bindings(
        info.host_config
            .as_ref()
            .and_then(|h| h.port_bindings.as_ref()),
    )
    .or_else(|| {
        from_bindings(
            info.network_settings
                .as_ref()
                .and_then(|n| n.ports.as_ref()),
        )
    })
}

/// 既存コンテナが使っているポート
pub fn ports_in_use(containers: &[ContainerSummary], range: PortRange) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for container in containers {
        if let Some(port) = container
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_ADB_PORT))
            .and_then(|p| p.parse::<u16>().ok())
        {
            ports.insert(port);
        }
        for port in container.ports.iter().flatten() {
            if let Some(public) = port.public_port {
                ports.insert(public);
            }
        }
    }
    ports.retain(|p| range.contains(*p));
    ports
}
