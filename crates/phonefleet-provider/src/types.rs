//! Shared device types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Backend capable of hosting a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Container-backed Android (Redroid on Docker)
    Redroid,
    /// Huawei Cloud Phone
    HuaweiCph,
    /// Aliyun Elastic Cloud Phone
    AliyunEcp,
    /// Physical device pool
    Physical,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [
        ProviderType::Redroid,
        ProviderType::HuaweiCph,
        ProviderType::AliyunEcp,
        ProviderType::Physical,
    ];

    /// Whether the provider's authoritative state lives with a cloud vendor
    pub fn is_cloud(&self) -> bool {
        matches!(self, ProviderType::HuaweiCph | ProviderType::AliyunEcp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Redroid => "redroid",
            ProviderType::HuaweiCph => "huawei_cph",
            ProviderType::AliyunEcp => "aliyun_ecp",
            ProviderType::Physical => "physical",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "redroid" => Ok(ProviderType::Redroid),
            "huawei_cph" | "huawei" => Ok(ProviderType::HuaweiCph),
            "aliyun_ecp" | "aliyun" => Ok(ProviderType::AliyunEcp),
            "physical" => Ok(ProviderType::Physical),
            other => Err(format!("unknown provider type: {}", other)),
        }
    }
}

/// Device lifecycle status
///
/// `Creating → Running ⇄ Stopped → Destroying → Destroyed`, with `Error`
/// reachable from any non-terminal state. Vendor vocabularies are mapped
/// onto this set by each adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Creating,
    Running,
    Stopped,
    Destroying,
    Destroyed,
    Error,
}

impl DeviceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceStatus::Destroyed | DeviceStatus::Error)
    }

    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (Destroyed, _) | (Error, _) => false,
            (_, Error) => true,
            (Creating, Running) | (Creating, Stopped) | (Creating, Destroying) => true,
            (Running, Stopped) | (Running, Destroying) | (Running, Creating) => true,
            (Stopped, Running) | (Stopped, Destroying) | (Stopped, Creating) => true,
            (Destroying, Destroyed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Creating => write!(f, "creating"),
            DeviceStatus::Running => write!(f, "running"),
            DeviceStatus::Stopped => write!(f, "stopped"),
            DeviceStatus::Destroying => write!(f, "destroying"),
            DeviceStatus::Destroyed => write!(f, "destroyed"),
            DeviceStatus::Error => write!(f, "error"),
        }
    }
}

/// ADB endpoint of a container or physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdbEndpoint {
    pub host: String,
    pub port: u16,
    pub serial: String,
}

impl AdbEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let serial = format!("{}:{}", host, port);
        Self { host, port, serial }
    }
}

/// Huawei Cloud Phone session ticket (single-shot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuaweiConnection {
    pub instance_id: String,
    pub access_ip: String,
    pub access_port: u16,
    pub session_id: String,
    pub ticket: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Short-lived WebRTC streaming credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRtcChannel {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// ADB servlet exposed by a cloud vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdbServlet {
    pub address: String,
    pub enabled: bool,
}

/// Aliyun Elastic Cloud Phone channels
///
/// The vendor hands out the streaming token and the ADB servlet through
/// separate calls, so either channel may be absent in a single response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliyunConnection {
    pub instance_id: String,
    pub webrtc: Option<WebRtcChannel>,
    pub adb: Option<AdbServlet>,
}

/// Connection information, one variant per provider type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider_type", rename_all = "snake_case")]
pub enum ConnectionInfo {
    Redroid { adb: AdbEndpoint },
    HuaweiCph(HuaweiConnection),
    AliyunEcp(AliyunConnection),
    Physical { adb: AdbEndpoint },
}

impl ConnectionInfo {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ConnectionInfo::Redroid { .. } => ProviderType::Redroid,
            ConnectionInfo::HuaweiCph(_) => ProviderType::HuaweiCph,
            ConnectionInfo::AliyunEcp(_) => ProviderType::AliyunEcp,
            ConnectionInfo::Physical { .. } => ProviderType::Physical,
        }
    }

    /// ADB endpoint for container and physical devices
    pub fn adb(&self) -> Option<&AdbEndpoint> {
        match self {
            ConnectionInfo::Redroid { adb } | ConnectionInfo::Physical { adb } => Some(adb),
            _ => None,
        }
    }

    /// Earliest credential expiry carried by this connection info
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ConnectionInfo::HuaweiCph(c) => c.expires_at,
            ConnectionInfo::AliyunEcp(c) => c.webrtc.as_ref().map(|w| w.expires_at),
            _ => None,
        }
    }

    /// Combine freshly fetched connection info with what is stored
    ///
    /// Aliyun exposes several sub-channels at once: channels present in
    /// `fresh` replace the stored ones, absent channels are kept. All other
    /// providers hand out a single ticket and are replaced in full.
    pub fn refreshed_with(self, fresh: ConnectionInfo) -> ConnectionInfo {
        match (self, fresh) {
            (ConnectionInfo::AliyunEcp(current), ConnectionInfo::AliyunEcp(fresh))
                if current.instance_id == fresh.instance_id =>
            {
                ConnectionInfo::AliyunEcp(AliyunConnection {
                    instance_id: fresh.instance_id,
                    webrtc: fresh.webrtc.or(current.webrtc),
                    adb: fresh.adb.or(current.adb),
                })
            }
            (_, fresh) => fresh,
        }
    }
}

/// Capture format supported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFormat {
    Screencap,
    Scrcpy,
    WebRtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Static declaration of what a provider supports
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub supports_adb: bool,
    pub supports_screen_capture: bool,
    pub supports_audio_capture: bool,
    pub supported_capture_formats: Vec<CaptureFormat>,
    pub max_resolution: Option<Resolution>,
    pub supports_touch_control: bool,
    pub supports_keyboard_input: bool,
    pub supports_file_transfer: bool,
    pub supports_app_install: bool,
    pub supports_screenshot: bool,
    pub supports_recording: bool,
    pub supports_location_mocking: bool,
    pub supports_rotation: bool,
    pub supports_snapshot: bool,
    pub supports_app_operation: bool,
    pub supports_camera: bool,
    pub supports_microphone: bool,
}

/// Hardware properties reported for a device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub manufacturer: String,
    pub model: String,
    pub android_version: String,
    pub serial_number: Option<String>,
    pub resolution: Option<String>,
    pub dpi: Option<u32>,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

/// Request to provision a new device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCreateConfig {
    pub name: String,
    pub user_id: Option<String>,
    pub cpu_cores: u32,
    pub memory_mb: u32,
    pub storage_mb: u32,
    pub resolution: Option<Resolution>,
    pub dpi: Option<u32>,
    pub android_version: Option<String>,
    /// Backend specific options (image id, region, requested serial, ...)
    #[serde(default)]
    pub provider_options: HashMap<String, String>,
}

impl DeviceCreateConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_cores: 2,
            memory_mb: 4096,
            storage_mb: 16384,
            ..Default::default()
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.provider_options.get(key).map(|s| s.as_str())
    }

    pub fn resolution_string(&self) -> String {
        self.resolution
            .map(|r| format!("{}x{}", r.width, r.height))
            .unwrap_or_else(|| "1080x1920".to_string())
    }
}

/// Result of a `create` call, mapped into a persisted device by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDevice {
    pub id: String,
    pub name: String,
    pub status: DeviceStatus,
    pub connection_info: ConnectionInfo,
    pub properties: DeviceProperties,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub provider_config: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwipeEvent {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
    pub duration_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Android key code (e.g. 3 = HOME, 4 = BACK)
    pub key_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub local_path: String,
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstallOptions {
    /// Local APK path, or an object-storage URL for cloud vendors
    pub apk_path: String,
    pub package_name: Option<String>,
    #[serde(default)]
    pub reinstall: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webrtc(token: &str) -> WebRtcChannel {
        WebRtcChannel {
            token: token.to_string(),
            url: String::new(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_provider_type_roundtrip() {
        for pt in ProviderType::ALL {
            assert_eq!(pt.as_str().parse::<ProviderType>().unwrap(), pt);
        }
        assert_eq!(
            "Aliyun-ECP".parse::<ProviderType>().unwrap(),
            ProviderType::AliyunEcp
        );
        assert!("gcp".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_only_vendors_are_cloud() {
        assert!(ProviderType::HuaweiCph.is_cloud());
        assert!(ProviderType::AliyunEcp.is_cloud());
        assert!(!ProviderType::Redroid.is_cloud());
        assert!(!ProviderType::Physical.is_cloud());
    }

    #[test]
    fn test_status_transitions() {
        use DeviceStatus::*;
        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Running));
        assert!(Running.can_transition_to(Error));
        assert!(Destroying.can_transition_to(Destroyed));
        assert!(!Destroyed.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(!Creating.can_transition_to(Destroyed));
    }

    #[test]
    fn test_aliyun_refresh_merges_channels() {
        let stored = ConnectionInfo::AliyunEcp(AliyunConnection {
            instance_id: "acp-1".to_string(),
            webrtc: Some(webrtc("old")),
            adb: Some(AdbServlet {
                address: "10.0.0.1:5555".to_string(),
                enabled: true,
            }),
        });
        let fresh = ConnectionInfo::AliyunEcp(AliyunConnection {
            instance_id: "acp-1".to_string(),
            webrtc: Some(webrtc("new")),
            adb: None,
        });

        let merged = stored.refreshed_with(fresh);
        let ConnectionInfo::AliyunEcp(merged) = merged else {
            panic!("variant changed");
        };
        assert_eq!(merged.webrtc.unwrap().token, "new");
        assert_eq!(merged.adb.unwrap().address, "10.0.0.1:5555");
    }

    #[test]
    fn test_single_ticket_refresh_replaces() {
        let stored = ConnectionInfo::HuaweiCph(HuaweiConnection {
            instance_id: "p-1".to_string(),
            access_ip: "1.1.1.1".to_string(),
            access_port: 8080,
            session_id: "s-old".to_string(),
            ticket: "t-old".to_string(),
            expires_at: None,
        });
        let fresh = ConnectionInfo::HuaweiCph(HuaweiConnection {
            instance_id: "p-1".to_string(),
            access_ip: "2.2.2.2".to_string(),
            access_port: 8080,
            session_id: "s-new".to_string(),
            ticket: "t-new".to_string(),
            expires_at: None,
        });

        assert_eq!(stored.refreshed_with(fresh.clone()), fresh);
    }

    #[test]
    fn test_connection_info_serde_tag() {
        let info = ConnectionInfo::Redroid {
            adb: AdbEndpoint::new("127.0.0.1", 5556),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["provider_type"], "redroid");
        assert_eq!(json["adb"]["serial"], "127.0.0.1:5556");
        let back: ConnectionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.provider_type(), ProviderType::Redroid);
    }
}
