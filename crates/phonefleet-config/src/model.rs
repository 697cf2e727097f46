//! Parsed configuration model

use phonefleet_provider::{ProviderType, RateLimitConfig, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "./data/devices.json";

#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    /// JSON device store
    pub store: PathBuf,
    pub sync: SyncSettings,
    pub providers: Vec<ProviderSettings>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE_PATH),
            sync: SyncSettings::default(),
            providers: Vec::new(),
        }
    }
}

impl FleetConfig {
    pub fn provider(&self, provider_type: ProviderType) -> Option<&ProviderSettings> {
        self.providers
            .iter()
            .find(|p| p.provider_type() == provider_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub status_interval: Duration,
    /// Devices queried at once within a cycle
    pub concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(300),
            concurrency: 8,
        }
    }
}

/// Resilience overrides shared by the vendor clients; `None` keeps the client default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSettings {
    pub rate_limit: Option<RateLimitConfig>,
    pub retry: Option<RetryPolicy>,
    pub call_timeout: Option<Duration>,
    pub token_timeout: Option<Duration>,
    pub token_refresh_interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuaweiSettings {
    /// Explicit endpoint, otherwise derived from `region`
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub project_id: String,
    pub auth_token: String,
    pub default_server_id: Option<String>,
    pub default_image_id: Option<String>,
    pub call: CallSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliyunSettings {
    pub endpoint: Option<String>,
    pub region_id: String,
    pub access_key_id: String,
    pub security_token: Option<String>,
    pub image_id: Option<String>,
    pub office_site_id: Option<String>,
    pub vswitch_id: Option<String>,
    pub backup_path: Option<String>,
    pub ticket_rate_limit: Option<RateLimitConfig>,
    pub call: CallSettings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedroidSettings {
    pub docker_host: Option<String>,
    pub image: Option<String>,
    pub adb_host: Option<String>,
    pub port_range: Option<(u16, u16)>,
    pub network: Option<String>,
    pub enable_audio: Option<bool>,
    pub adb_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalDeviceSettings {
    pub serial: String,
    pub host: Option<String>,
    pub port: u16,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalSettings {
    pub devices: Vec<PhysicalDeviceSettings>,
    pub adb_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    HuaweiCph(HuaweiSettings),
    AliyunEcp(AliyunSettings),
    Redroid(RedroidSettings),
    Physical(PhysicalSettings),
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::HuaweiCph(_) => ProviderType::HuaweiCph,
            ProviderSettings::AliyunEcp(_) => ProviderType::AliyunEcp,
            ProviderSettings::Redroid(_) => ProviderType::Redroid,
            ProviderSettings::Physical(_) => ProviderType::Physical,
        }
    }

    /// Configured token refresh cadence, if overridden
    pub fn token_refresh_interval(&self) -> Option<Duration> {
        match self {
            ProviderSettings::HuaweiCph(s) => s.call.token_refresh_interval,
            ProviderSettings::AliyunEcp(s) => s.call.token_refresh_interval,
            ProviderSettings::Redroid(_) | ProviderSettings::Physical(_) => None,
        }
    }
}
