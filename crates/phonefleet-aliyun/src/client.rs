//! ECP OpenAPI client
//!
//! RPC-style: every call is a POST to the endpoint root carrying the action
//! name in `x-acs-action`. Connection tickets use their own bucket so the
//! 10 s refresh loop never starves lifecycle calls.

use crate::error::{AliyunError, Result, is_transient_code};
use crate::types::{
    API_VERSION, AdbAttributeList, BackupFileList, CreateInstanceGroupRequest, EcpConfig,
    EcpErrorBody, EcpTask, InstanceGroupCreated, InstanceList, InvocationList, OssPath,
    TicketList,
};
use async_trait::async_trait;
use phonefleet_provider::{CallGuard, ProviderError, RateLimiter, VendorResult};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const RATE_LIMIT_KEY: &str = "aliyun-api";
pub const TICKET_RATE_LIMIT_KEY: &str = "aliyun-ticket";

type VendorCall<T> = std::result::Result<VendorResult<T>, ProviderError>;

/// Operations the Aliyun adapter needs from ECP
///
/// Same contract as the CPH client: `Err` for transport and resilience
/// failures, `Ok(VendorResult)` whenever ECP answered.
#[async_trait]
pub trait EcpApi: Send + Sync {
    async fn describe_instances(&self, instance_ids: &[String]) -> VendorCall<InstanceList>;
    async fn create_instance_group(
        &self,
        request: &CreateInstanceGroupRequest,
    ) -> VendorCall<InstanceGroupCreated>;
    async fn delete_instance_group(&self, group_id: &str) -> VendorCall<EcpTask>;
    async fn start_instance(&self, instance_id: &str) -> VendorCall<EcpTask>;
    async fn stop_instance(&self, instance_id: &str) -> VendorCall<EcpTask>;
    async fn reboot_instance(&self, instance_id: &str) -> VendorCall<EcpTask>;
    async fn batch_get_connection_ticket(&self, instance_id: &str) -> VendorCall<TicketList>;
    async fn list_instance_adb_attributes(
        &self,
        instance_id: &str,
    ) -> VendorCall<AdbAttributeList>;
    /// Starts an asynchronous shell command; the result is fetched with
    /// [`EcpApi::describe_invocations`]
    async fn run_command(
        &self,
        instance_id: &str,
        command: &str,
        timeout_secs: u32,
    ) -> VendorCall<EcpTask>;
    async fn describe_invocations(&self, invoke_id: &str) -> VendorCall<InvocationList>;
    /// Apps are installed per instance group from a registered app id
    async fn install_app(&self, group_id: &str, app_id: &str) -> VendorCall<EcpTask>;
    async fn uninstall_app(&self, group_id: &str, app_id: &str) -> VendorCall<EcpTask>;
    async fn send_file(
        &self,
        instance_id: &str,
        source: &OssPath,
        android_path: &str,
    ) -> VendorCall<EcpTask>;
    async fn fetch_file(
        &self,
        instance_id: &str,
        android_path: &str,
        target: &OssPath,
    ) -> VendorCall<EcpTask>;
    async fn backup_file(
        &self,
        instance_id: &str,
        target: &OssPath,
        name: &str,
    ) -> VendorCall<EcpTask>;
    async fn recovery_file(&self, instance_id: &str, backup_file_id: &str) -> VendorCall<EcpTask>;
    async fn describe_backup_files(&self, instance_id: &str) -> VendorCall<BackupFileList>;
    async fn delete_backup_file(&self, backup_file_id: &str) -> VendorCall<EcpTask>;
}

/// reqwest-based ECP client
pub struct AliyunEcpClient {
    client: reqwest::Client,
    config: EcpConfig,
    guard: CallGuard,
    ticket_guard: CallGuard,
}

impl AliyunEcpClient {
    pub fn new(config: EcpConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        config.validate()?;
        let guard = CallGuard::new(limiter.clone(), RATE_LIMIT_KEY)
            .with_rate(config.rate_limit)
            .with_retry(config.retry.clone())
            .with_call_timeout(config.call_timeout)
            .with_token_timeout(config.token_timeout);
        // チケットは短い間隔で再取得されるので待ち時間も短くする
        let ticket_guard = CallGuard::new(limiter, TICKET_RATE_LIMIT_KEY)
            .with_rate(config.ticket_rate_limit)
            .with_retry(
                config
                    .retry
                    .clone()
                    .with_base_delay(Duration::from_millis(500)),
            )
            .with_call_timeout(config.call_timeout)
            .with_token_timeout(config.token_timeout);
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            guard,
            ticket_guard,
        })
    }

    pub fn config(&self) -> &EcpConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}/", self.config.endpoint.trim_end_matches('/'))
    }

    async fn call<T: DeserializeOwned + Send>(&self, action: &str, params: Value) -> VendorCall<T> {
        self.call_with(&self.guard, action, params).await
    }

    async fn call_with<T: DeserializeOwned + Send>(
        &self,
        guard: &CallGuard,
        action: &str,
        params: Value,
    ) -> VendorCall<T> {
        let params = &params;
        guard
            .call(action, || async move { Ok(self.send_once(action, params).await?) })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &Value,
    ) -> Result<VendorResult<T>> {
        tracing::debug!(action, region = %self.config.region_id, "ECP request");

        let mut request = self
            .client
            .post(self.url())
            .header("x-acs-action", action)
            .header("x-acs-version", API_VERSION)
            .header("x-acs-accesskey-id", &self.config.access_key_id)
            .json(params);
        if let Some(token) = &self.config.security_token {
            request = request.header("x-acs-security-token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let value: Value = if text.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&text)?
            };
            let request_id = value
                .get("RequestId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let data: T = serde_json::from_value(value)?;
            return Ok(VendorResult::ok(data).with_request_id(request_id));
        }

        let error: EcpErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = if error.code.is_empty() {
            "UnknownError".to_string()
        } else {
            error.code
        };

        // スロットリングは HTTP 400 で返ることがあるのでコードでも判定する
        if status.as_u16() == 429 || status.is_server_error() || is_transient_code(&code) {
            return Err(AliyunError::Api {
                status: status.as_u16(),
                code,
                message: error.message,
                request_id: error.request_id,
            });
        }

        Ok(VendorResult::failed(code, error.message).with_request_id(error.request_id))
    }
}

#[async_trait]
impl EcpApi for AliyunEcpClient {
    async fn describe_instances(&self, instance_ids: &[String]) -> VendorCall<InstanceList> {
        self.call(
            "DescribeAndroidInstances",
            json!({
                "BizRegionId": self.config.region_id,
                "AndroidInstanceIds": instance_ids,
            }),
        )
        .await
    }

    async fn create_instance_group(
        &self,
        request: &CreateInstanceGroupRequest,
    ) -> VendorCall<InstanceGroupCreated> {
        let params = serde_json::to_value(request)
            .map_err(|e| ProviderError::from(AliyunError::from(e)))?;
        self.call("CreateAndroidInstanceGroup", params).await
    }

    async fn delete_instance_group(&self, group_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "DeleteAndroidInstanceGroup",
            json!({ "InstanceGroupIds": [group_id] }),
        )
        .await
    }

    async fn start_instance(&self, instance_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "StartAndroidInstance",
            json!({ "AndroidInstanceIds": [instance_id] }),
        )
        .await
    }

    async fn stop_instance(&self, instance_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "StopAndroidInstance",
            json!({ "AndroidInstanceIds": [instance_id] }),
        )
        .await
    }

    async fn reboot_instance(&self, instance_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "RebootAndroidInstancesInGroup",
            json!({ "AndroidInstanceIds": [instance_id] }),
        )
        .await
    }

    async fn batch_get_connection_ticket(&self, instance_id: &str) -> VendorCall<TicketList> {
        self.call_with(
            &self.ticket_guard,
            "BatchGetAcpConnectionTicket",
            json!({ "InstanceIds": [instance_id] }),
        )
        .await
    }

    async fn list_instance_adb_attributes(
        &self,
        instance_id: &str,
    ) -> VendorCall<AdbAttributeList> {
        self.call(
            "ListInstanceAdbAttributes",
            json!({ "InstanceIds": [instance_id] }),
        )
        .await
    }

    async fn run_command(
        &self,
        instance_id: &str,
        command: &str,
        timeout_secs: u32,
    ) -> VendorCall<EcpTask> {
        self.call(
            "RunCommand",
            json!({
                "InstanceIds": [instance_id],
                "CommandContent": command,
                "Timeout": timeout_secs,
                "ContentEncoding": "PlainText",
            }),
        )
        .await
    }

    async fn describe_invocations(&self, invoke_id: &str) -> VendorCall<InvocationList> {
        self.call("DescribeInvocations", json!({ "InvocationId": invoke_id }))
            .await
    }

    async fn install_app(&self, group_id: &str, app_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "InstallApp",
            json!({ "InstanceGroupIdList": [group_id], "AppIdList": [app_id] }),
        )
        .await
    }

    async fn uninstall_app(&self, group_id: &str, app_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "UninstallApp",
            json!({ "InstanceGroupIdList": [group_id], "AppIdList": [app_id] }),
        )
        .await
    }

    async fn send_file(
        &self,
        instance_id: &str,
        source: &OssPath,
        android_path: &str,
    ) -> VendorCall<EcpTask> {
        self.call(
            "SendFile",
            json!({
                "AndroidInstanceIdList": [instance_id],
                "SourceFilePath": source.uri(),
                "AndroidPath": android_path,
            }),
        )
        .await
    }

    async fn fetch_file(
        &self,
        instance_id: &str,
        android_path: &str,
        target: &OssPath,
    ) -> VendorCall<EcpTask> {
        self.call(
            "FetchFile",
            json!({
                "AndroidInstanceIdList": [instance_id],
                "SourceFilePath": android_path,
                "UploadType": "OSS",
                "UploadEndpoint": target.uri(),
            }),
        )
        .await
    }

    async fn backup_file(
        &self,
        instance_id: &str,
        target: &OssPath,
        name: &str,
    ) -> VendorCall<EcpTask> {
        self.call(
            "BackupFile",
            json!({
                "AndroidInstanceIdList": [instance_id],
                "BackupFilePath": target.uri(),
                "BackupFileName": name,
                "UploadType": "OSS",
            }),
        )
        .await
    }

    async fn recovery_file(&self, instance_id: &str, backup_file_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "RecoveryFile",
            json!({
                "AndroidInstanceIdList": [instance_id],
                "BackupFileId": backup_file_id,
            }),
        )
        .await
    }

    async fn describe_backup_files(&self, instance_id: &str) -> VendorCall<BackupFileList> {
        self.call(
            "DescribeBackupFiles",
            json!({ "AndroidInstanceId": instance_id }),
        )
        .await
    }

    async fn delete_backup_file(&self, backup_file_id: &str) -> VendorCall<EcpTask> {
        self.call(
            "DeleteBackupFile",
            json!({ "BackupFileIdList": [backup_file_id] }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_incomplete_config() {
        let config = EcpConfig::new("https://eds-aic.cn-shanghai.aliyuncs.com", "", "ak");
        assert!(matches!(
            AliyunEcpClient::new(config, Arc::new(RateLimiter::new())),
            Err(AliyunError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_url_and_endpoint() {
        let endpoint = EcpConfig::endpoint_for_region("cn-shanghai");
        let config = EcpConfig::new(format!("{}/", endpoint), "cn-shanghai", "ak");
        let client = AliyunEcpClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        assert_eq!(client.url(), "https://eds-aic.cn-shanghai.aliyuncs.com/");
    }

    #[tokio::test]
    async fn test_ticket_calls_use_their_own_bucket() {
        let limiter = Arc::new(RateLimiter::new());
        let mut config = EcpConfig::new("http://127.0.0.1:1", "cn-shanghai", "ak");
        config.retry = phonefleet_provider::RetryPolicy::vendor().with_max_attempts(1);
        let client = AliyunEcpClient::new(config, limiter.clone()).unwrap();

        let err = client.batch_get_connection_ticket("acp-1").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transient { .. } | ProviderError::Timeout(_)
        ));

        let ticket_rate = *client.ticket_guard.rate();
        assert_eq!(
            limiter.available_tokens(TICKET_RATE_LIMIT_KEY, &ticket_rate),
            ticket_rate.capacity - 1
        );
        let main_rate = *client.guard.rate();
        assert_eq!(
            limiter.available_tokens(RATE_LIMIT_KEY, &main_rate),
            main_rate.capacity
        );
    }
}
