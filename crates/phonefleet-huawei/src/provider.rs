//! Huawei Cloud Phone provider implementation

use crate::client::CphApi;
use crate::error::{HuaweiError, is_transient_code};
use crate::types::{CphJob, CphJobs, CphPhone, CreatePhoneRequest, ObsPath, select_spec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phonefleet_provider::adb::escape_input_text;
use phonefleet_provider::{
    AppInstallOptions, AppManagement, CaptureFormat, ConnectionInfo, DeviceCapabilities,
    DeviceCreateConfig, DeviceProperties, DeviceProvider, DeviceStatus, FileTransfer,
    FileTransferControl, HuaweiConnection, InputControl, KeyEvent, ProviderDevice, ProviderError,
    ProviderType, Resolution, Result, SwipeEvent, TextInput, TouchEvent,
};
use std::collections::HashMap;
use std::sync::Arc;

/// WebRTC access port handed out with session tickets
const DEFAULT_ACCESS_PORT: u16 = 8080;
const DEFAULT_PUSH_DIR: &str = "/data/local/tmp";
const SHELL_TIMEOUT_SECS: u32 = 60;

/// Huawei Cloud Phone provider
pub struct HuaweiProvider {
    api: Arc<dyn CphApi>,
    default_server_id: Option<String>,
    default_image_id: Option<String>,
    capabilities: DeviceCapabilities,
}

impl HuaweiProvider {
    pub fn new(api: Arc<dyn CphApi>) -> Self {
        Self {
            api,
            default_server_id: None,
            default_image_id: None,
            capabilities: Self::build_capabilities(),
        }
    }

    pub fn with_defaults(mut self, server_id: Option<String>, image_id: Option<String>) -> Self {
        self.default_server_id = server_id;
        self.default_image_id = image_id;
        self
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
            // 入力は CPH の同期 ADB コマンド経由
            supports_touch_control: true,
            supports_keyboard_input: true,
            // ファイル / APK は OBS 経由
            supports_file_transfer: true,
            supports_app_install: true,
            supports_rotation: true,
            supports_microphone: true,
            ..Default::default()
        }
    }

    /// Run a shell command through the CPH sync-command API
    pub async fn execute_shell(&self, device_id: &str, command: &str) -> Result<String> {
        tracing::debug!(device_id, command, "Executing shell command on cloud phone");
        let jobs = self
            .api
            .run_adb_command(device_id, command, SHELL_TIMEOUT_SECS)
            .await?
            .into_data(is_transient_code)?;
        let job = job_for(jobs, device_id)?;
        Ok(job.execute_output.unwrap_or_default())
    }

    /// Installed package names (`pm list packages`)
    pub async fn installed_apps(&self, device_id: &str) -> Result<Vec<String>> {
        let output = self.execute_shell(device_id, "pm list packages").await?;
        Ok(output
            .lines()
            .filter_map(|line| line.strip_prefix("package:"))
            .map(|pkg| pkg.trim().to_string())
            .filter(|pkg| !pkg.is_empty())
            .collect())
    }

    async fn phone(&self, device_id: &str) -> Result<CphPhone> {
        self.api
            .get_phone(device_id)
            .await?
            .into_data(is_transient_code)
    }

    async fn shell_unit(&self, device_id: &str, command: &str) -> Result<()> {
        self.execute_shell(device_id, command).await.map(|_| ())
    }
}

/// The job started for `phone_id`, failing if CPH rejected it
fn job_for(jobs: CphJobs, phone_id: &str) -> Result<CphJob> {
    let request_id = jobs.request_id.clone();
    let job = jobs
        .jobs
        .into_iter()
        .find(|job| job.phone_id == phone_id)
        .ok_or_else(|| ProviderError::Terminal {
            code: "JobMissing".to_string(),
            message: format!("CPH returned no job for phone {}", phone_id),
            request_id: request_id.clone(),
        })?;

    if let Some(code) = job.error_code.clone().filter(|c| !c.is_empty()) {
        let message = job.error_msg.clone().unwrap_or_default();
        return Err(if is_transient_code(&code) {
            ProviderError::Transient {
                code,
                message,
                request_id,
            }
        } else {
            ProviderError::Terminal {
                code,
                message,
                request_id,
            }
        });
    }
    Ok(job)
}

fn parse_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl DeviceProvider for HuaweiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::HuaweiCph
    }

    async fn create(&self, config: &DeviceCreateConfig) -> Result<ProviderDevice> {
        let spec = config
            .option("spec_id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| select_spec(config.cpu_cores, config.memory_mb).to_string());
        let image_id = config
            .option("image_id")
            .map(|s| s.to_string())
            .or_else(|| self.default_image_id.clone())
            .ok_or_else(|| ProviderError::InvalidConfig("Huawei CPH image id is not set".into()))?;
        let server_id = config
            .option("server_id")
            .map(|s| s.to_string())
            .or_else(|| self.default_server_id.clone())
            .ok_or_else(|| ProviderError::InvalidConfig("Huawei CPH server id is not set".into()))?;
        let resolution = config.resolution_string();
        let property = serde_json::json!({
            "user_id": config.user_id,
            "resolution": resolution,
        });

        tracing::info!(name = %config.name, spec = %spec, "Creating Huawei cloud phone");

        let request = CreatePhoneRequest {
            phone_name: config.name.clone(),
            phone_model_name: spec.clone(),
            image_id,
            server_id: server_id.clone(),
            property: property.to_string(),
        };
        let phone = self
            .api
            .create_phone(&request)
            .await?
            .into_data(is_transient_code)?;

        let mut provider_config = HashMap::new();
        provider_config.insert("server_id".to_string(), serde_json::json!(server_id));
        provider_config.insert("spec_id".to_string(), serde_json::json!(spec));

        Ok(ProviderDevice {
            id: phone.phone_id.clone(),
            name: phone.phone_name.clone(),
            status: phone.phone_status().to_device_status(),
            // チケットは接続時に取得する
            connection_info: ConnectionInfo::HuaweiCph(HuaweiConnection {
                instance_id: phone.phone_id.clone(),
                access_ip: phone
                    .access_ip
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                access_port: DEFAULT_ACCESS_PORT,
                session_id: phone.phone_id.clone(),
                ticket: String::new(),
                expires_at: None,
            }),
            properties: DeviceProperties {
                manufacturer: "Huawei".to_string(),
                model: format!("CPH-{}", spec),
                android_version: "10".to_string(),
                serial_number: Some(phone.phone_id.clone()),
                resolution: Some(resolution),
                dpi: Some(config.dpi.unwrap_or(480)),
                custom: HashMap::new(),
            },
            created_at: parse_time(phone.create_time.as_deref()),
            provider_config,
        })
    }

    async fn start(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Starting Huawei cloud phone");
        let jobs = self
            .api
            .restart_phone(device_id)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
    }

    async fn stop(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Stopping Huawei cloud phone");
        let jobs = self
            .api
            .stop_phone(device_id)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
    }

    async fn destroy(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Deleting Huawei cloud phone");
        self.api
            .delete_phone(device_id)
            .await?
            .into_result(is_transient_code)
            .map(|_| ())
    }

    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        let phone = self.phone(device_id).await?;
        let status = phone.phone_status().to_device_status();
        tracing::debug!(
            device_id,
            raw_status = phone.status,
            status = %status,
            "Huawei phone status"
        );
        Ok(status)
    }

    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo> {
        let list = self
            .api
            .get_connection_info(device_id)
            .await?
            .into_data(is_transient_code)?;

        if let Some(info) = list.connect_infos.into_iter().find(|c| c.phone_id == device_id) {
            return Ok(ConnectionInfo::HuaweiCph(HuaweiConnection {
                instance_id: info.phone_id,
                access_ip: info.access_info.access_ip,
                access_port: info.access_info.access_port,
                session_id: info.access_info.session_id,
                ticket: info.access_info.ticket,
                expires_at: None,
            }));
        }

        match list.errors.into_iter().find(|e| e.phone_id == device_id) {
            Some(err) if is_transient_code(&err.error_code) => {
                Err(ProviderError::transient(err.error_code, err.error_msg))
            }
            Some(err) => Err(ProviderError::terminal(err.error_code, err.error_msg)),
            None => Err(ProviderError::terminal(
                "NoConnectInfo",
                format!("CPH returned no access info for phone {}", device_id),
            )),
        }
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn get_properties(&self, device_id: &str) -> Result<DeviceProperties> {
        let phone = self.phone(device_id).await?;
        let mut custom = HashMap::new();
        custom.insert("server_id".to_string(), phone.server_id.clone());
        custom.insert("image_id".to_string(), phone.image_id.clone());

        Ok(DeviceProperties {
            manufacturer: "Huawei".to_string(),
            model: format!("CPH-{}", phone.phone_model_name),
            android_version: "10".to_string(),
            serial_number: Some(phone.phone_id.clone()),
            resolution: Some(
                phone
                    .property_value("resolution")
                    .unwrap_or_else(|| "1080x1920".to_string()),
            ),
            dpi: Some(480),
            custom,
        })
    }

    async fn reboot(&self, device_id: &str) -> Result<()> {
        tracing::info!(device_id, "Rebooting Huawei cloud phone");
        let jobs = self
            .api
            .restart_phone(device_id)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
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
}

#[async_trait]
impl InputControl for HuaweiProvider {
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
impl FileTransferControl for HuaweiProvider {
    /// `local_path` is an OBS location of a tar archive
    async fn push_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let archive = ObsPath::parse(&transfer.local_path)?;
        if !archive.object.to_lowercase().ends_with(".tar") {
            return Err(HuaweiError::UnsupportedArchive(transfer.local_path.clone()).into());
        }
        let target_dir = if transfer.remote_path.is_empty() {
            DEFAULT_PUSH_DIR
        } else {
            transfer.remote_path.as_str()
        };

        tracing::info!(device_id, archive = %archive.uri(), "Pushing archive to Huawei cloud phone");
        let jobs = self
            .api
            .push_file(device_id, &archive, target_dir)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
    }

    /// `local_path` is the OBS destination
    async fn pull_file(&self, device_id: &str, transfer: &FileTransfer) -> Result<()> {
        let target = ObsPath::parse(&transfer.local_path)?;
        let jobs = self
            .api
            .export_data(device_id, &transfer.remote_path, &target)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
    }
}

#[async_trait]
impl AppManagement for HuaweiProvider {
    /// Returns the CPH job id of the installation
    async fn install_app(&self, device_id: &str, options: &AppInstallOptions) -> Result<String> {
        let apk = ObsPath::parse(&options.apk_path)?;
        tracing::info!(device_id, apk = %apk.uri(), "Installing APK on Huawei cloud phone");
        let jobs = self
            .api
            .install_apk(device_id, &apk)
            .await?
            .into_data(is_transient_code)?;
        Ok(job_for(jobs, device_id)?.job_id)
    }

    async fn uninstall_app(&self, device_id: &str, package_name: &str) -> Result<()> {
        let jobs = self
            .api
            .uninstall_apk(device_id, package_name)
            .await?
            .into_data(is_transient_code)?;
        job_for(jobs, device_id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessInfo, ConnectInfo, ConnectInfoList, PhoneError};
    use phonefleet_provider::{ErrorKind, VendorResult};
    use std::sync::Mutex;

    type VendorCall<T> = std::result::Result<VendorResult<T>, ProviderError>;

    #[derive(Default)]
    struct MockCph {
        status: Mutex<i32>,
        connect: Mutex<Option<ConnectInfoList>>,
        commands: Mutex<Vec<String>>,
        fail_code: Mutex<Option<String>>,
    }

    impl MockCph {
        fn jobs(&self, phone_id: &str) -> VendorCall<CphJobs> {
            if let Some(code) = self.fail_code.lock().unwrap().clone() {
                return Ok(VendorResult::failed(code, "rejected"));
            }
            Ok(VendorResult::ok(CphJobs {
                request_id: Some("req-1".into()),
                jobs: vec![CphJob {
                    phone_id: phone_id.to_string(),
                    job_id: "job-1".into(),
                    error_code: None,
                    error_msg: None,
                    execute_output: Some("package:com.a\npackage:com.b\n".into()),
                }],
            }))
        }
    }

    fn phone(phone_id: &str, status: i32) -> CphPhone {
        CphPhone {
            phone_id: phone_id.to_string(),
            phone_name: "phone".into(),
            server_id: "srv-1".into(),
            image_id: "img-1".into(),
            phone_model_name: "cloudphone.rx1.2xlarge".into(),
            status,
            create_time: Some("2024-05-01T08:00:00Z".into()),
            property: None,
            access_ip: Some("10.0.0.8".into()),
        }
    }

    #[async_trait]
    impl CphApi for MockCph {
        async fn create_phone(&self, request: &CreatePhoneRequest) -> VendorCall<CphPhone> {
            let mut p = phone("p-new", 1);
            p.phone_name = request.phone_name.clone();
            Ok(VendorResult::ok(p))
        }

        async fn get_phone(&self, phone_id: &str) -> VendorCall<CphPhone> {
            if let Some(code) = self.fail_code.lock().unwrap().clone() {
                return Ok(VendorResult::failed(code, "rejected"));
            }
            Ok(VendorResult::ok(phone(phone_id, *self.status.lock().unwrap())))
        }

        async fn restart_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
            self.jobs(phone_id)
        }

        async fn stop_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
            self.jobs(phone_id)
        }

        async fn delete_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
            self.jobs(phone_id)
        }

        async fn get_connection_info(&self, _phone_id: &str) -> VendorCall<ConnectInfoList> {
            Ok(VendorResult::ok(
                self.connect.lock().unwrap().clone().unwrap_or_default(),
            ))
        }

        async fn run_adb_command(
            &self,
            phone_id: &str,
            command: &str,
            _timeout_secs: u32,
        ) -> VendorCall<CphJobs> {
            self.commands.lock().unwrap().push(command.to_string());
            self.jobs(phone_id)
        }

        async fn install_apk(&self, phone_id: &str, apk: &ObsPath) -> VendorCall<CphJobs> {
            self.commands.lock().unwrap().push(apk.uri());
            self.jobs(phone_id)
        }

        async fn uninstall_apk(&self, phone_id: &str, _package: &str) -> VendorCall<CphJobs> {
            self.jobs(phone_id)
        }

        async fn push_file(
            &self,
            phone_id: &str,
            _archive: &ObsPath,
            target_dir: &str,
        ) -> VendorCall<CphJobs> {
            self.commands.lock().unwrap().push(target_dir.to_string());
            self.jobs(phone_id)
        }

        async fn export_data(
            &self,
            phone_id: &str,
            _remote_path: &str,
            _target: &ObsPath,
        ) -> VendorCall<CphJobs> {
            self.jobs(phone_id)
        }
    }

    fn provider(mock: Arc<MockCph>) -> HuaweiProvider {
        HuaweiProvider::new(mock).with_defaults(Some("srv-1".into()), Some("img-1".into()))
    }

    #[tokio::test]
    async fn test_get_status_maps_vendor_codes() {
        let mock = Arc::new(MockCph::default());
        let provider = provider(mock.clone());

        *mock.status.lock().unwrap() = 2;
        assert_eq!(provider.get_status("p-1").await.unwrap(), DeviceStatus::Running);

        *mock.status.lock().unwrap() = 4;
        assert_eq!(provider.get_status("p-1").await.unwrap(), DeviceStatus::Creating);

        *mock.status.lock().unwrap() = 8;
        assert_eq!(provider.get_status("p-1").await.unwrap(), DeviceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_vendor_failure_is_classified() {
        let mock = Arc::new(MockCph::default());
        let provider = provider(mock.clone());

        *mock.fail_code.lock().unwrap() = Some("CPS.0004".into());
        let err = provider.get_status("p-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Terminal);

        *mock.fail_code.lock().unwrap() = Some("APIGW.0308".into());
        let err = provider.get_status("p-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_connection_info_from_ticket() {
        let mock = Arc::new(MockCph::default());
        *mock.connect.lock().unwrap() = Some(ConnectInfoList {
            connect_infos: vec![ConnectInfo {
                phone_id: "p-1".into(),
                access_info: AccessInfo {
                    access_ip: "1.2.3.4".into(),
                    access_port: 30001,
                    session_id: "s-1".into(),
                    ticket: "t-1".into(),
                },
            }],
            errors: vec![],
        });
        let provider = provider(mock);

        let info = provider.get_connection_info("p-1").await.unwrap();
        match info {
            ConnectionInfo::HuaweiCph(c) => {
                assert_eq!(c.instance_id, "p-1");
                assert_eq!(c.access_port, 30001);
                assert_eq!(c.ticket, "t-1");
            }
            other => panic!("unexpected connection info: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_error_entry() {
        let mock = Arc::new(MockCph::default());
        *mock.connect.lock().unwrap() = Some(ConnectInfoList {
            connect_infos: vec![],
            errors: vec![PhoneError {
                phone_id: "p-1".into(),
                error_code: "CPS.0010".into(),
                error_msg: "phone not running".into(),
            }],
        });
        let provider = provider(mock);

        let err = provider.get_connection_info("p-1").await.unwrap_err();
        assert_eq!(err, ProviderError::terminal("CPS.0010", "phone not running"));
    }

    #[tokio::test]
    async fn test_create_requires_image() {
        let provider = HuaweiProvider::new(Arc::new(MockCph::default()));
        let err = provider
            .create(&DeviceCreateConfig::new("d"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn test_create_maps_phone() {
        let provider = provider(Arc::new(MockCph::default()));
        let device = provider.create(&DeviceCreateConfig::new("d-1")).await.unwrap();

        assert_eq!(device.id, "p-new");
        assert_eq!(device.name, "d-1");
        assert_eq!(device.status, DeviceStatus::Creating);
        assert_eq!(device.properties.model, "CPH-cloudphone.rx1.2xlarge");
        assert_eq!(device.connection_info.provider_type(), ProviderType::HuaweiCph);
    }

    #[tokio::test]
    async fn test_input_goes_through_shell() {
        let mock = Arc::new(MockCph::default());
        let provider: Box<dyn DeviceProvider> = Box::new(provider(mock.clone()));

        let input = provider.input_control().unwrap();
        input.send_touch("p-1", TouchEvent { x: 5, y: 9 }).await.unwrap();
        input
            .input_text("p-1", &TextInput { text: "hi there".into() })
            .await
            .unwrap();

        assert_eq!(
            *mock.commands.lock().unwrap(),
            vec!["input tap 5 9".to_string(), "input text hi%sthere".to_string()]
        );
        assert!(provider.media_capture().is_err());
        assert!(provider.snapshot_management().is_err());
    }

    #[tokio::test]
    async fn test_push_requires_tar() {
        let mock = Arc::new(MockCph::default());
        let provider = provider(mock.clone());

        let err = provider
            .push_file(
                "p-1",
                &FileTransfer {
                    local_path: "obs://bucket/data.zip".into(),
                    remote_path: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Terminal);

        provider
            .push_file(
                "p-1",
                &FileTransfer {
                    local_path: "obs://bucket/data.tar".into(),
                    remote_path: String::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(*mock.commands.lock().unwrap(), vec![DEFAULT_PUSH_DIR.to_string()]);
    }

    #[tokio::test]
    async fn test_install_returns_job_id() {
        let provider = provider(Arc::new(MockCph::default()));
        let job = provider
            .install_app(
                "p-1",
                &AppInstallOptions {
                    apk_path: "obs://apks/app.apk".into(),
                    package_name: None,
                    reinstall: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(job, "job-1");
        assert_eq!(
            provider.installed_apps("p-1").await.unwrap(),
            vec!["com.a".to_string(), "com.b".to_string()]
        );
    }
}
