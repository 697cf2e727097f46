//! Aliyun ECP provider implementation

use crate::client::EcpApi;
use crate::error::{AliyunError, is_transient_code};
use crate::types::{
    CreateInstanceGroupRequest, EcpInstance, EcpTask, OssPath, TICKET_TTL, select_spec,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phonefleet_provider::adb::escape_input_text;
use phonefleet_provider::{
    AdbServlet, AliyunConnection, AppInstallOptions, AppManagement, CaptureFormat, ConnectionInfo,
    DeviceCapabilities, DeviceCreateConfig, DeviceProperties, DeviceProvider, DeviceSnapshot,
    DeviceStatus, FileTransfer, FileTransferControl, InputControl, KeyEvent, ProviderDevice,
    ProviderError, ProviderType, Resolution, Result, SnapshotManagement, SwipeEvent, TextInput,
    TouchEvent, VendorResult, WebRtcChannel,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const SHELL_TIMEOUT_SECS: u32 = 60;
const INVOCATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Defaults applied when a create request does not carry its own options
#[derive(Debug, Clone, Default)]
pub struct AliyunDefaults {
    pub region_id: String,
    pub image_id: Option<String>,
    pub office_site_id: Option<String>,
    pub vswitch_id: Option<String>,
    /// OSS prefix for snapshots (`oss://bucket/prefix`)
    pub backup_path: Option<String>,
}

/// Aliyun Elastic Cloud Phone provider
///
/// ECP creates and deletes instances through instance groups of size one.
/// The instance → group mapping is cached at creation and looked up through
/// `DescribeAndroidInstances` for instances created elsewhere.
pub struct AliyunProvider {
    api: Arc<dyn EcpApi>,
    defaults: AliyunDefaults,
    groups: RwLock<HashMap<String, String>>,
    capabilities: DeviceCapabilities,
}

impl AliyunProvider {
    pub fn new(api: Arc<dyn EcpApi>, defaults: AliyunDefaults) -> Self {
        Self {
            api,
            defaults,
            groups: RwLock::new(HashMap::new()),
            capabilities: Self::build_capabilities(),
        }
    }

    fn build_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            supports_adb: true,
            supports_screen_capture: true,
            supports_audio_capture: true,
            supported_capture_formats: vec![CaptureFormat::WebRtc],
            max_resolution: Some(Resolution {
                width: 1920,
                height: 1080,
            }),
            supports_touch_control: true,
            supports_keyboard_input: true,
            // OSS 経由
            supports_file_transfer: true,
            supports_app_install: true,
            supports_snapshot: true,
            supports_rotation: true,
            ..Default::default()
        }
    }

    /// Run a shell command and wait for its output
    pub async fn execute_shell(&self, device_id: &str, command: &str) -> Result<String> {
        tracing::debug!(device_id, command, "Executing shell command on ECP instance");
        let task = self
            .api
            .run_command(device_id, command, SHELL_TIMEOUT_SECS)
            .await?
            .into_data(is_transient_code)?;
        let invoke_id = task.invoke_id.ok_or_else(|| {
            ProviderError::terminal("EmptyResponse", "RunCommand returned no invoke id")
        })?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(SHELL_TIMEOUT_SECS as u64);
        loop {
            let invocations = self
                .api
                .describe_invocations(&invoke_id)
                .await?
                .into_data(is_transient_code)?;
            if let Some(invocation) = invocations
                .data
                .into_iter()
                .find(|i| i.android_instance_id == device_id && i.is_finished())
            {
                let output = invocation.output.clone().unwrap_or_default();
                if invocation.is_success() {
                    return Ok(output);
                }
                return Err(AliyunError::CommandFailed {
                    instance_id: device_id.to_string(),
                    output,
                }
                .into());
            }

            if tokio::time::Instant::now() + INVOCATION_POLL_INTERVAL > deadline {
                return Err(AliyunError::CommandTimeout {
                    invoke_id,
                    timeout_secs: SHELL_TIMEOUT_SECS,
                }
                .into());
            }
            tokio::time::sleep(INVOCATION_POLL_INTERVAL).await;
        }
    }

    async fn instance(&self, device_id: &str) -> Result<EcpInstance> {
        let list = self
            .api
            .describe_instances(&[device_id.to_string()])
            .await?
            .into_data(is_transient_code)?;
        list.instances
            .into_iter()
            .find(|i| i.android_instance_id == device_id)
            .ok_or_else(|| {
                ProviderError::terminal(
                    "InstanceNotFound",
                    format!("ECP returned no instance {}", device_id),
                )
            })
    }

    fn cached_group(&self, device_id: &str) -> Option<String> {
        self.groups
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(device_id)
            .cloned()
    }

    fn remember_group(&self, device_id: &str, group_id: &str) {
        self.groups
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(device_id.to_string(), group_id.to_string());
    }

    fn forget_group(&self, device_id: &str) {
        self.groups
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(device_id);
    }

    async fn instance_group(&self, device_id: &str) -> Result<String> {
        if let Some(group) = self.cached_group(device_id) {
            return Ok(group);
        }
        let instance = self.instance(device_id).await?;
        if instance.instance_group_id.is_empty() {
            return Err(AliyunError::InstanceGroupNotFound(device_id.to_string()).into());
        }
        self.remember_group(device_id, &instance.instance_group_id);
        Ok(instance.instance_group_id)
    }

    async fn adb_servlet(&self, device_id: &str) -> Result<Option<AdbServlet>> {
        let list = self
            .api
            .list_instance_adb_attributes(device_id)
            .await?
            .into_data(is_transient_code)?;
        Ok(list
            .instance_adb_attributes
            .into_iter()
            .find(|a| a.android_instance_id == device_id && !a.adb_servlet_address.is_empty())
            .map(|a| AdbServlet {
                address: a.adb_servlet_address,
                enabled: a.adb_enabled,
            }))
    }

    fn backup_root(&self) -> Result<OssPath> {
        let raw = self.defaults.backup_path.as_deref().ok_or_else(|| {
            ProviderError::InvalidConfig("Aliyun ECP backup path is not set".into())
        })?;
        Ok(OssPath::parse(raw)?)
    }

    async fn shell_unit(&self, device_id: &str, command: &str) -> Result<()> {
        self.execute_shell(device_id, command).await.map(|_| ())
    }
}

/// Settle a call that only starts an ECP task
fn settle(call: Result<VendorResult<EcpTask>>) -> Result<()> {
    call?.into_result(is_transient_code).map(|_| ())
}

fn parse_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl DeviceProvider for AliyunProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::AliyunEcp
    }

    async fn create(&self, config: &DeviceCreateConfig) -> Result<ProviderDevice> {
        let spec = config
            .option("spec_id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| select_spec(config.cpu_cores, config.memory_mb).to_string());
        let image_id = config
            .option("image_id")
            .map(|s| s.to_string())
            .or_else(|| self.defaults.image_id.clone())
            .ok_or_else(|| ProviderError::InvalidConfig("Aliyun ECP image id is not set".into()))?;
        let region_id = config
            .option("region_id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.defaults.region_id.clone());

        tracing::info!(name = %config.name, spec = %spec, region = %region_id, "Creating Aliyun ECP instance");

        let request = CreateInstanceGroupRequest {
            biz_region_id: region_id.clone(),
            instance_group_spec: spec.clone(),
            image_id,
            instance_group_name: config.name.clone(),
            number_of_instances: 1,
            charge_type: "PostPaid".to_string(),
            office_site_id: config
                .option("office_site_id")
                .map(|s| s.to_string())
                .or_else(|| self.defaults.office_site_id.clone()),
            vswitch_id: config
                .option("vswitch_id")
                .map(|s| s.to_string())
                .or_else(|| self.defaults.vswitch_id.clone()),
        };
        let created = self
            .api
            .create_instance_group(&request)
            .await?
            .into_data(is_transient_code)?;

        let (Some(instance_id), Some(group_id)) = (
            created.instance_ids.first().cloned(),
            created.instance_group_ids.first().cloned(),
        ) else {
            return Err(ProviderError::terminal(
                "EmptyResponse",
                "CreateAndroidInstanceGroup returned no instance",
            ));
        };
        self.remember_group(&instance_id, &group_id);

        let mut provider_config = HashMap::new();
        provider_config.insert("instance_group_id".to_string(), serde_json::json!(group_id));
        provider_config.insert("spec_id".to_string(), serde_json::json!(spec));
        provider_config.insert("region_id".to_string(), serde_json::json!(region_id));

        Ok(ProviderDevice {
            id: instance_id.clone(),
            name: config.name.clone(),
            status: DeviceStatus::Creating,
            // チケットは起動後に取得する
            connection_info: ConnectionInfo::AliyunEcp(AliyunConnection {
                instance_id: instance_id.clone(),
                webrtc: None,
                adb: None,
            }),
            properties: DeviceProperties {
                manufacturer: "Alibaba Cloud".to_string(),
                model: format!("ECP-{}", spec),
                android_version: config
                    .android_version
                    .clone()
                    .unwrap_or_else(|| "11".to_string()),
                serial_number: Some(instance_id),
                resolution: Some(config.resolution_string()),
                dpi: config.dpi,
                custom: HashMap::new(),
            },
            created_at: Utc::now(),
            provider_config,
        })
    }

    async fn start(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Starting Aliyun ECP instance");
        settle(self.api.start_instance(device_id).await)
    }

    async fn stop(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Stopping Aliyun ECP instance");
        settle(self.api.stop_instance(device_id).await)
    }

    async fn destroy(&self, device_id: &str) -> Result<()> {
        let group_id = self.instance_group(device_id).await?;
        tracing::info!(device_id, group_id = %group_id, "Deleting Aliyun ECP instance group");
        settle(self.api.delete_instance_group(&group_id).await)?;
        self.forget_group(device_id);
        Ok(())
    }

    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        let instance = self.instance(device_id).await?;
        let status = instance.status().to_device_status();
        tracing::debug!(
            device_id,
            raw_status = %instance.android_instance_status,
            status = %status,
            "Aliyun instance status"
        );
        Ok(status)
    }

    /// Fresh WebRTC ticket plus the ADB servlet address
    ///
    /// The ticket is required. The ADB channel is fetched best effort and
    /// left `None` when unavailable so callers keep the stored one.
    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo> {
        let tickets = self
            .api
            .batch_get_connection_ticket(device_id)
            .await?
            .into_data(is_transient_code)?;
        let ticket = tickets
            .instance_connection_models
            .into_iter()
            .find(|t| t.android_instance_id == device_id)
            .ok_or_else(|| {
                ProviderError::terminal(
                    "NoConnectionTicket",
                    format!("ECP returned no ticket for instance {}", device_id),
                )
            })?;

        if let Some(code) = ticket.error_code.clone().filter(|c| !c.is_empty()) {
            let message = format!("ticket request failed for instance {}", device_id);
            return Err(if is_transient_code(&code) {
                ProviderError::transient(code, message)
            } else {
                ProviderError::terminal(code, message)
            });
        }
        if ticket.connection_ticket.is_empty() {
            return Err(ProviderError::terminal(
                "EmptyTicket",
                format!("ECP returned an empty ticket for instance {}", device_id),
            ));
        }

        let adb = match self.adb_servlet(device_id).await {
            Ok(adb) => adb,
            Err(e) => {
                tracing::warn!(device_id, error = %e, "Failed to fetch ADB servlet address");
                None
            }
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(TICKET_TTL).unwrap_or_else(|_| chrono::Duration::seconds(30));
        Ok(ConnectionInfo::AliyunEcp(AliyunConnection {
            instance_id: device_id.to_string(),
            webrtc: Some(WebRtcChannel {
                token: ticket.connection_ticket,
                // the ticket is consumed by the ECP web SDK; there is no signalling URL
                url: String::new(),
                expires_at,
            }),
            adb,
        }))
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn get_properties(&self, device_id: &str) -> Result<DeviceProperties> {
        let instance = self.instance(device_id).await?;
        let mut custom = HashMap::new();
        custom.insert(
            "instance_group_id".to_string(),
            instance.instance_group_id.clone(),
        );
        if let Some(region) = &instance.biz_region_id {
            custom.insert("region_id".to_string(), region.clone());
        }
        if let Some(ip) = &instance.network_interface_ip {
            custom.insert("network_interface_ip".to_string(), ip.clone());
        }
        if let Some(ip) = &instance.public_ip {
            custom.insert("public_ip".to_string(), ip.clone());
        }
        custom.insert(
            "created_at".to_string(),
            parse_time(instance.gmt_create.as_deref()).to_rfc3339(),
        );

        Ok(DeviceProperties {
            manufacturer: "Alibaba Cloud".to_string(),
            model: "ECP".to_string(),
            android_version: instance
                .android_version
                .clone()
                .unwrap_or_else(|| "11".to_string()),
            serial_number: Some(instance.android_instance_id.clone()),
            resolution: instance.resolution.clone(),
            dpi: None,
            custom,
        })
    }

    async fn reboot(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Rebooting Aliyun ECP instance");
        settle(self.api.reboot_instance(device_id).await)
    }

    fn input(&self) -> Option<&dyn InputControl> {
        Some(self)
    }

    fn files(&self) -> Option<&dyn FileTransferControl> {
        Some(self)
    }

    fn apps(&self) -> Option<&dyn AppManagement> {
        Some(self)
    }

    fn snapshots(&self) -> Option<&dyn SnapshotManagement> {
        Some(self)
    }
}

#[async_trait]
impl InputControl for AliyunProvider {
    async fn send_touch(&self, device_id: &str, event: TouchEvent) -> Result<()> {
        self.shell_unit(device_id, &format!("input tap {} {}", event.x, event.y))
            .await
    }

    async fn send_swipe(&self, device_id: &str, event: SwipeEvent) -> Result<()> {
        let command = format!(
            "input swipe {} {} {} {} {}",
            event.start_x, event.start_y, event.end_x, event.end_y, event.duration_ms
        );
        self.shell_unit(device_id, &command).await
    }

    async fn send_key(&self, device_id: &str, event: KeyEvent) -> Result<()> {
        self.shell_unit(device_id, &format!("input keyevent {}", event.key_code))
            .await
    }

    async fn input_text(&self, device_id: &str, input: &TextInput) -> Result<()> {
        let command = format!("input text {}", escape_input_text(&input.text));
        self.shell_unit(device_id, &command).await
    }
}

#[async_trait]
impl FileTransferControl for AliyunProvider {
    /// `local_path` is the OSS source object
    async fn push_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let source = OssPath::parse(&transfer.local_path)?;
        tracing::info!(device_id, source = %source.uri(), "Sending file to ECP instance");
        settle(
            self.api
                .send_file(device_id, &source, &transfer.remote_path)
                .await,
        )
    }

    /// `local_path` is the OSS destination
    async fn pull_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let target = OssPath::parse(&transfer.local_path)?;
        settle(
            self.api
                .fetch_file(device_id, &transfer.remote_path, &target)
                .await,
        )
    }
}

#[async_trait]
impl AppManagement for AliyunProvider {
    /// ECP installs apps registered in the console; `apk_path` carries the app id
    async fn install_app(&self, device_id: &str, options: &AppInstallOptions) -> Result<String> {
        let group_id = self.instance_group(device_id).await?;
        let app_id = options.apk_path.as_str();
        tracing::info!(device_id, group_id = %group_id, app_id, "Installing app on ECP instance group");
        settle(self.api.install_app(&group_id, app_id).await)?;
        Ok(options
            .package_name
            .clone()
            .unwrap_or_else(|| app_id.to_string()))
    }

    async fn uninstall_app(&self, device_id: &str, package_name: &str) -> Result<()> {
        let group_id = self.instance_group(device_id).await?;
        settle(self.api.uninstall_app(&group_id, package_name).await)
    }
}

#[async_trait]
impl SnapshotManagement for AliyunProvider {
    async fn create_snapshot(&self, device_id: &str, name: &str) -> Result<DeviceSnapshot> {
        let target = self.backup_root()?.join(device_id);
        tracing::info!(device_id, name, target = %target.uri(), "Backing up ECP instance");
        let task = self
            .api
            .backup_file(device_id, &target, name)
            .await?
            .into_data(is_transient_code)?;

        let id = match task.backup_file_id {
            Some(id) => id,
            None => self
                .list_snapshots(device_id)
                .await?
                .into_iter()
                .find(|s| s.name == name)
                .map(|s| s.id)
                .ok_or_else(|| {
                    ProviderError::terminal(
                        "BackupFileMissing",
                        format!("backup {} was not listed for instance {}", name, device_id),
                    )
                })?,
        };

        Ok(DeviceSnapshot {
            id,
            name: name.to_string(),
            device_id: device_id.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn restore_snapshot(&self, device_id: &str, snapshot_id: &str) -> Result<()> {
        tracing::info!(device_id, snapshot_id, "Restoring ECP instance from backup");
        settle(self.api.recovery_file(device_id, snapshot_id).await)
    }

    async fn list_snapshots(&self, device_id: &str) -> Result<Vec<DeviceSnapshot>> {
        let files = self
            .api
            .describe_backup_files(device_id)
            .await?
            .into_data(is_transient_code)?;
        Ok(files
            .data
            .into_iter()
            .map(|f| DeviceSnapshot {
                id: f.backup_file_id,
                name: f.backup_file_name,
                device_id: device_id.to_string(),
                created_at: parse_time(f.gmt_create.as_deref()),
            })
            .collect())
    }

    async fn delete_snapshot(&self, _device_id: &str, snapshot_id: &str) -> Result<()> {
        settle(self.api.delete_backup_file(snapshot_id).await)
    }
}
