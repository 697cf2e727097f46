//! CPH API types

use crate::error::{HuaweiError, Result};
use phonefleet_provider::{DeviceStatus, RateLimitConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration for one CPH project
#[derive(Debug, Clone)]
pub struct CphConfig {
    /// e.g. `https://cph.cn-north-4.myhuaweicloud.com`
    pub endpoint: String,
    pub project_id: String,
    /// IAM token sent as `X-Auth-Token`
    pub auth_token: String,
    pub default_server_id: Option<String>,
    pub default_image_id: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub token_timeout: Duration,
}

impl CphConfig {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            auth_token: auth_token.into(),
            default_server_id: None,
            default_image_id: None,
            rate_limit: RateLimitConfig::new(20, 10),
            retry: RetryPolicy::vendor(),
            call_timeout: Duration::from_secs(10),
            token_timeout: Duration::from_secs(5),
        }
    }

    /// Endpoint derived from a region name
    pub fn endpoint_for_region(region: &str) -> String {
        format!("https://cph.{}.myhuaweicloud.com", region)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(HuaweiError::InvalidConfig("endpoint is empty".into()));
        }
        if self.project_id.is_empty() {
            return Err(HuaweiError::InvalidConfig("project-id is empty".into()));
        }
        if self.auth_token.is_empty() {
            return Err(HuaweiError::InvalidConfig("auth-token is empty".into()));
        }
        Ok(())
    }
}

/// Cloud phone status as reported by CPH (integer codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneStatus {
    Creating,
    Running,
    Resetting,
    Rebooting,
    Frozen,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    ResetFailed,
    RebootFailed,
    Abnormal,
    CreateFailed,
    StopFailed,
    Unknown(i32),
}

impl PhoneStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 | 1 => PhoneStatus::Creating,
            2 => PhoneStatus::Running,
            3 => PhoneStatus::Resetting,
            4 => PhoneStatus::Rebooting,
            6 => PhoneStatus::Frozen,
            7 => PhoneStatus::Stopping,
            8 => PhoneStatus::Stopped,
            9 => PhoneStatus::Deleting,
            10 => PhoneStatus::Deleted,
            -5 => PhoneStatus::ResetFailed,
            -6 => PhoneStatus::RebootFailed,
            -7 => PhoneStatus::Abnormal,
            -8 => PhoneStatus::CreateFailed,
            -9 => PhoneStatus::StopFailed,
            other => PhoneStatus::Unknown(other),
        }
    }

    /// Nearest safe lifecycle status
    ///
    /// Rebooting and resetting are reported as `Creating`: the phone is
    /// temporarily unusable and comes back on its own.
    pub fn to_device_status(self) -> DeviceStatus {
        match self {
            PhoneStatus::Creating | PhoneStatus::Resetting | PhoneStatus::Rebooting => {
                DeviceStatus::Creating
            }
            PhoneStatus::Running => DeviceStatus::Running,
            PhoneStatus::Stopping | PhoneStatus::Stopped => DeviceStatus::Stopped,
            PhoneStatus::Deleting => DeviceStatus::Destroying,
            PhoneStatus::Deleted => DeviceStatus::Destroyed,
            PhoneStatus::Frozen
            | PhoneStatus::ResetFailed
            | PhoneStatus::RebootFailed
            | PhoneStatus::Abnormal
            | PhoneStatus::CreateFailed
            | PhoneStatus::StopFailed
            | PhoneStatus::Unknown(_) => DeviceStatus::Error,
        }
    }
}

/// Cloud phone detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CphPhone {
    pub phone_id: String,
    pub phone_name: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub phone_model_name: String,
    pub status: i32,
    #[serde(default)]
    pub create_time: Option<String>,
    /// JSON-encoded phone property string
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub access_ip: Option<String>,
}

impl CphPhone {
    pub fn phone_status(&self) -> PhoneStatus {
        PhoneStatus::from_code(self.status)
    }

    /// Read a key out of the JSON property string
    pub fn property_value(&self, key: &str) -> Option<String> {
        let raw = self.property.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value.get(key)?.as_str().map(|s| s.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePhoneRequest {
    pub phone_name: String,
    pub phone_model_name: String,
    pub image_id: String,
    pub server_id: String,
    /// JSON-encoded property string
    pub property: String,
}

/// Session access information for one phone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub access_ip: String,
    pub access_port: u16,
    pub session_id: String,
    pub ticket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub phone_id: String,
    pub access_info: AccessInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectInfoList {
    #[serde(default)]
    pub connect_infos: Vec<ConnectInfo>,
    #[serde(default)]
    pub errors: Vec<PhoneError>,
}

/// Per-phone failure inside a batch answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneError {
    pub phone_id: String,
    pub error_code: String,
    pub error_msg: String,
}

/// Asynchronous job started by a batch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CphJob {
    pub phone_id: String,
    pub job_id: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
    /// Output of synchronous commands
    #[serde(default)]
    pub execute_output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CphJobs {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub jobs: Vec<CphJob>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CphErrorBody {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_msg: String,
}

/// Object location in OBS, parsed from `obs://bucket/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsPath {
    pub bucket: String,
    pub object: String,
}

impl ObsPath {
    /// Accepts `obs://bucket/path`, `/bucket/path` and `bucket/path`
    pub fn parse(path: &str) -> Result<Self> {
        let normalized = path.trim_start_matches("obs://").trim_start_matches('/');
        match normalized.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            _ => Err(HuaweiError::InvalidObsPath(path.to_string())),
        }
    }

    pub fn uri(&self) -> String {
        format!("obs://{}/{}", self.bucket, self.object)
    }
}

/// Phone spec chosen from requested cores and memory
pub fn select_spec(cpu_cores: u32, memory_mb: u32) -> &'static str {
    if cpu_cores >= 8 && memory_mb >= 8192 {
        "cloudphone.rx1.8xlarge"
    } else if cpu_cores >= 4 && memory_mb >= 4096 {
        "cloudphone.rx1.4xlarge"
    } else {
        "cloudphone.rx1.2xlarge"
    }
}
