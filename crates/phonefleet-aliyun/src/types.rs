//! ECP API types
//!
//! Wire structs follow the PascalCase field naming of the ECP OpenAPI.

use crate::error::{AliyunError, Result};
use phonefleet_provider::{DeviceStatus, RateLimitConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_VERSION: &str = "2023-09-30";

/// Lifetime of a connection ticket handed out by `BatchGetAcpConnectionTicket`
pub const TICKET_TTL: Duration = Duration::from_secs(30);

/// Client configuration for one ECP account / region
#[derive(Debug, Clone)]
pub struct EcpConfig {
    /// e.g. `https://eds-aic.cn-shanghai.aliyuncs.com`
    pub endpoint: String,
    pub region_id: String,
    /// Pre-issued access key, sent as `x-acs-accesskey-id`
    pub access_key_id: String,
    /// STS security token, sent as `x-acs-security-token` when set
    pub security_token: Option<String>,
    pub default_image_id: Option<String>,
    pub default_office_site_id: Option<String>,
    pub default_vswitch_id: Option<String>,
    /// OSS prefix backups are written to, e.g. `oss://bucket/backups`
    pub backup_path: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// Separate bucket for connection tickets (hot path of token refresh)
    pub ticket_rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub token_timeout: Duration,
}

impl EcpConfig {
    pub fn new(
        endpoint: impl Into<String>,
        region_id: impl Into<String>,
        access_key_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            region_id: region_id.into(),
            access_key_id: access_key_id.into(),
            security_token: None,
            default_image_id: None,
            default_office_site_id: None,
            default_vswitch_id: None,
            backup_path: None,
            rate_limit: RateLimitConfig::new(20, 10),
            ticket_rate_limit: RateLimitConfig::new(30, 15),
            retry: RetryPolicy::vendor(),
            call_timeout: Duration::from_secs(10),
            token_timeout: Duration::from_secs(5),
        }
    }

    pub fn endpoint_for_region(region: &str) -> String {
        format!("https://eds-aic.{}.aliyuncs.com", region)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(AliyunError::InvalidConfig("endpoint is empty".into()));
        }
        if self.region_id.is_empty() {
            return Err(AliyunError::InvalidConfig("region is empty".into()));
        }
        if self.access_key_id.is_empty() {
            return Err(AliyunError::InvalidConfig("access-key-id is empty".into()));
        }
        Ok(())
    }
}

/// Instance status as reported by ECP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Creating,
    Starting,
    Running,
    Rebooting,
    Resetting,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    Error,
    Unknown(String),
}

impl InstanceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CREATING" => InstanceStatus::Creating,
            "STARTING" => InstanceStatus::Starting,
            "RUNNING" => InstanceStatus::Running,
            "REBOOTING" => InstanceStatus::Rebooting,
            "RESETTING" => InstanceStatus::Resetting,
            "STOPPING" => InstanceStatus::Stopping,
            "STOPPED" => InstanceStatus::Stopped,
            "DELETING" => InstanceStatus::Deleting,
            "DELETED" | "RELEASED" => InstanceStatus::Deleted,
            "ERROR" | "CREATE_FAILED" => InstanceStatus::Error,
            _ => InstanceStatus::Unknown(raw.to_string()),
        }
    }

    pub fn to_device_status(&self) -> DeviceStatus {
        match self {
            InstanceStatus::Creating
            | InstanceStatus::Starting
            | InstanceStatus::Rebooting
            | InstanceStatus::Resetting => DeviceStatus::Creating,
            InstanceStatus::Running => DeviceStatus::Running,
            InstanceStatus::Stopping | InstanceStatus::Stopped => DeviceStatus::Stopped,
            InstanceStatus::Deleting => DeviceStatus::Destroying,
            InstanceStatus::Deleted => DeviceStatus::Destroyed,
            InstanceStatus::Error | InstanceStatus::Unknown(_) => DeviceStatus::Error,
        }
    }
}

/// One Android instance (`DescribeAndroidInstances`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EcpInstance {
    pub android_instance_id: String,
    #[serde(default)]
    pub instance_group_id: String,
    #[serde(default)]
    pub android_instance_name: String,
    pub android_instance_status: String,
    #[serde(default)]
    pub android_version: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub biz_region_id: Option<String>,
    #[serde(default)]
    pub network_interface_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub adb_servlet_address: Option<String>,
    #[serde(default)]
    pub key_pair_id: Option<String>,
    #[serde(default)]
    pub gmt_create: Option<String>,
}

impl EcpInstance {
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::parse(&self.android_instance_status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceList {
    #[serde(default, rename = "InstanceModel")]
    pub instances: Vec<EcpInstance>,
    #[serde(default)]
    pub total_count: u32,
}

/// `CreateAndroidInstanceGroup` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateInstanceGroupRequest {
    pub biz_region_id: String,
    pub instance_group_spec: String,
    pub image_id: String,
    pub instance_group_name: String,
    pub number_of_instances: u32,
    pub charge_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub office_site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "VSwitchId")]
    pub vswitch_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceGroupCreated {
    #[serde(default)]
    pub instance_group_ids: Vec<String>,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

/// One entry of `BatchGetAcpConnectionTicket`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionTicket {
    pub android_instance_id: String,
    #[serde(default)]
    pub connection_ticket: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_status: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TicketList {
    #[serde(default)]
    pub instance_connection_models: Vec<ConnectionTicket>,
}

/// ADB servlet state of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdbAttribute {
    pub android_instance_id: String,
    #[serde(default)]
    pub adb_servlet_address: String,
    #[serde(default)]
    pub adb_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdbAttributeList {
    #[serde(default)]
    pub instance_adb_attributes: Vec<AdbAttribute>,
}

/// Answer of commands that start an asynchronous task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EcpTask {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub invoke_id: Option<String>,
    /// Set by `BackupFile` when the file id is known up front
    #[serde(default)]
    pub backup_file_id: Option<String>,
}

/// Output of one `RunCommand` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invocation {
    pub android_instance_id: String,
    #[serde(default)]
    pub invocation_status: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
}

impl Invocation {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.invocation_status.to_ascii_lowercase().as_str(),
            "success" | "finished" | "failed" | "timeout"
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.invocation_status.to_ascii_lowercase().as_str(),
            "success" | "finished"
        ) && self.exit_code.unwrap_or(0) == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationList {
    #[serde(default)]
    pub data: Vec<Invocation>,
}

/// Backup file stored in OSS (`DescribeBackupFiles`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupFile {
    pub backup_file_id: String,
    #[serde(default)]
    pub backup_file_name: String,
    #[serde(default)]
    pub android_instance_id: String,
    #[serde(default)]
    pub gmt_create: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupFileList {
    #[serde(default)]
    pub data: Vec<BackupFile>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EcpErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Object location in OSS, parsed from `oss://bucket/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OssPath {
    pub bucket: String,
    pub object: String,
}

impl OssPath {
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix("oss://")
            .ok_or_else(|| AliyunError::InvalidOssPath(path.to_string()))?;
        match rest.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                object: object.trim_end_matches('/').to_string(),
            }),
            _ => Err(AliyunError::InvalidOssPath(path.to_string())),
        }
    }

    pub fn uri(&self) -> String {
        format!("oss://{}/{}", self.bucket, self.object)
    }

    pub fn join(&self, name: &str) -> Self {
        Self {
            bucket: self.bucket.clone(),
            object: format!("{}/{}", self.object, name),
        }
    }
}

/// Instance group spec chosen from requested cores and memory
pub fn select_spec(cpu_cores: u32, memory_mb: u32) -> &'static str {
    if cpu_cores >= 8 && memory_mb >= 16384 {
        "acp.perf.large"
    } else if cpu_cores >= 4 && memory_mb >= 8192 {
        "acp.basic.large"
    } else {
        "acp.basic.small"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            ("CREATING", DeviceStatus::Creating),
            ("STARTING", DeviceStatus::Creating),
            ("REBOOTING", DeviceStatus::Creating),
            ("RESETTING", DeviceStatus::Creating),
            ("RUNNING", DeviceStatus::Running),
            ("STOPPING", DeviceStatus::Stopped),
            ("STOPPED", DeviceStatus::Stopped),
            ("DELETING", DeviceStatus::Destroying),
            ("DELETED", DeviceStatus::Destroyed),
            ("ERROR", DeviceStatus::Error),
            ("UPGRADING", DeviceStatus::Error),
        ];
        for (raw, expected) in cases {
            assert_eq!(InstanceStatus::parse(raw).to_device_status(), expected, "{}", raw);
        }
        assert_eq!(
            InstanceStatus::parse("BACKUPING"),
            InstanceStatus::Unknown("BACKUPING".into())
        );
    }

    #[test]
    fn test_instance_list_from_wire() {
        let json = r#"{
            "RequestId": "r-1",
            "TotalCount": 1,
            "InstanceModel": [{
                "AndroidInstanceId": "acp-1",
                "InstanceGroupId": "ag-1",
                "AndroidInstanceName": "phone",
                "AndroidInstanceStatus": "RUNNING",
                "AdbServletAddress": "10.0.0.3:5555"
            }]
        }"#;
        let list: InstanceList = serde_json::from_str(json).unwrap();
        assert_eq!(list.total_count, 1);
        let instance = &list.instances[0];
        assert_eq!(instance.instance_group_id, "ag-1");
        assert_eq!(instance.status(), InstanceStatus::Running);
        assert_eq!(instance.adb_servlet_address.as_deref(), Some("10.0.0.3:5555"));
    }

    #[test]
    fn test_create_request_wire_names() {
        let request = CreateInstanceGroupRequest {
            biz_region_id: "cn-shanghai".into(),
            instance_group_spec: "acp.basic.small".into(),
            image_id: "img-1".into(),
            instance_group_name: "d-1".into(),
            number_of_instances: 1,
            charge_type: "PostPaid".into(),
            office_site_id: None,
            vswitch_id: Some("vsw-1".into()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["BizRegionId"], "cn-shanghai");
        assert_eq!(value["NumberOfInstances"], 1);
        assert_eq!(value["VSwitchId"], "vsw-1");
        assert!(value.get("OfficeSiteId").is_none());
    }

    #[test]
    fn test_parse_oss_path() {
        let path = OssPath::parse("oss://files/apps/app.apk").unwrap();
        assert_eq!(path.bucket, "files");
        assert_eq!(path.object, "apps/app.apk");
        assert_eq!(
            OssPath::parse("oss://files/backups/").unwrap().join("b1").uri(),
            "oss://files/backups/b1"
        );
        assert!(OssPath::parse("files/apps/app.apk").is_err());
        assert!(OssPath::parse("oss://files").is_err());
    }

    #[test]
    fn test_invocation_state() {
        let mut invocation = Invocation {
            android_instance_id: "acp-1".into(),
            invocation_status: "Running".into(),
            output: None,
            exit_code: None,
        };
        assert!(!invocation.is_finished());
        invocation.invocation_status = "Success".into();
        assert!(invocation.is_finished());
        assert!(invocation.is_success());
        invocation.exit_code = Some(1);
        assert!(!invocation.is_success());
    }
}
