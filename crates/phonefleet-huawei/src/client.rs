//! CPH REST API client
//!
//! Every request goes through a [`CallGuard`] keyed `huawei-cph`, so all
//! phones of a project share one token bucket.

use crate::error::{HuaweiError, Result};
use crate::types::{
    CphConfig, CphErrorBody, CphJobs, CphPhone, ConnectInfoList, CreatePhoneRequest, ObsPath,
};
use async_trait::async_trait;
use phonefleet_provider::{CallGuard, ProviderError, RateLimiter, VendorResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

pub const RATE_LIMIT_KEY: &str = "huawei-cph";

type VendorCall<T> = std::result::Result<VendorResult<T>, ProviderError>;

/// Operations the Huawei adapter needs from CPH
///
/// `Err` means the request never produced a vendor answer (network,
/// timeout, rate limit). Vendor-side failures come back as an `Ok`
/// [`VendorResult`] with `success == false`.
#[async_trait]
pub trait CphApi: Send + Sync {
    async fn create_phone(&self, request: &CreatePhoneRequest) -> VendorCall<CphPhone>;
    async fn get_phone(&self, phone_id: &str) -> VendorCall<CphPhone>;
    /// CPH has no separate start call: a stopped phone is started by a restart
    async fn restart_phone(&self, phone_id: &str) -> VendorCall<CphJobs>;
    async fn stop_phone(&self, phone_id: &str) -> VendorCall<CphJobs>;
    async fn delete_phone(&self, phone_id: &str) -> VendorCall<CphJobs>;
    async fn get_connection_info(&self, phone_id: &str) -> VendorCall<ConnectInfoList>;
    /// Synchronous ADB shell command; output is in `jobs[0].execute_output`
    async fn run_adb_command(
        &self,
        phone_id: &str,
        command: &str,
        timeout_secs: u32,
    ) -> VendorCall<CphJobs>;
    async fn install_apk(&self, phone_id: &str, apk: &ObsPath) -> VendorCall<CphJobs>;
    async fn uninstall_apk(&self, phone_id: &str, package_name: &str) -> VendorCall<CphJobs>;
    /// Push a tar archive from OBS and extract it under `target_dir`
    async fn push_file(
        &self,
        phone_id: &str,
        archive: &ObsPath,
        target_dir: &str,
    ) -> VendorCall<CphJobs>;
    /// Export `remote_path` from the phone into OBS
    async fn export_data(
        &self,
        phone_id: &str,
        remote_path: &str,
        target: &ObsPath,
    ) -> VendorCall<CphJobs>;
}

/// reqwest-based CPH client
pub struct HuaweiCphClient {
    client: reqwest::Client,
    config: CphConfig,
    guard: CallGuard,
}

impl HuaweiCphClient {
    pub fn new(config: CphConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        config.validate()?;
        let guard = CallGuard::new(limiter, RATE_LIMIT_KEY)
            .with_rate(config.rate_limit)
            .with_retry(config.retry.clone())
            .with_call_timeout(config.call_timeout)
            .with_token_timeout(config.token_timeout);
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            guard,
        })
    }

    pub fn config(&self) -> &CphConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/cloud-phone{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id,
            path
        )
    }

    async fn request<T: DeserializeOwned + Send>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> VendorCall<T> {
        let url = self.url(path);
        let body = body.as_ref();
        self.guard
            .call(operation, || {
                let method = method.clone();
                let url = url.as_str();
                async move { Ok(self.send_once(method, url, body).await?) }
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<VendorResult<T>> {
        tracing::debug!("CPH request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .header("X-Auth-Token", &self.config.auth_token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get("X-Request-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let text = response.text().await?;

        if status.is_success() {
            let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
            let data: T = serde_json::from_str(text)?;
            return Ok(VendorResult::ok(data).with_request_id(request_id));
        }

        let error: CphErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = if error.error_code.is_empty() {
            format!("HTTP.{}", status.as_u16())
        } else {
            error.error_code
        };

        // 429 / 5xx は再試行対象としてエラーで返す
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(HuaweiError::Api {
                status: status.as_u16(),
                code,
                message: error.error_msg,
                request_id,
            });
        }

        Ok(VendorResult::failed(code, error.error_msg).with_request_id(request_id))
    }
}

#[async_trait]
impl CphApi for HuaweiCphClient {
    async fn create_phone(&self, request: &CreatePhoneRequest) -> VendorCall<CphPhone> {
        let body = serde_json::to_value(request)
            .map_err(|e| ProviderError::from(HuaweiError::from(e)))?;
        self.request("create_phone", Method::POST, "/phones", Some(body))
            .await
    }

    async fn get_phone(&self, phone_id: &str) -> VendorCall<CphPhone> {
        self.request(
            "get_phone",
            Method::GET,
            &format!("/phones/{}", phone_id),
            None,
        )
        .await
    }

    async fn restart_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
        let body = json!({ "phones": [{ "phone_id": phone_id }] });
        self.request(
            "restart_phone",
            Method::POST,
            "/phones/batch-restart",
            Some(body),
        )
        .await
    }

    async fn stop_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
        let body = json!({ "phone_ids": [phone_id] });
        self.request("stop_phone", Method::POST, "/phones/batch-stop", Some(body))
            .await
    }

    async fn delete_phone(&self, phone_id: &str) -> VendorCall<CphJobs> {
        self.request(
            "delete_phone",
            Method::DELETE,
            &format!("/phones/{}", phone_id),
            None,
        )
        .await
    }

    async fn get_connection_info(&self, phone_id: &str) -> VendorCall<ConnectInfoList> {
        let body = json!({ "phone_ids": [phone_id] });
        self.request(
            "get_connection_info",
            Method::POST,
            "/phones/batch-connection",
            Some(body),
        )
        .await
    }

    async fn run_adb_command(
        &self,
        phone_id: &str,
        command: &str,
        timeout_secs: u32,
    ) -> VendorCall<CphJobs> {
        let body = json!({
            "command": "shell",
            "content": command,
            "phone_ids": [phone_id],
            "timeout": timeout_secs,
        });
        self.request(
            "run_adb_command",
            Method::POST,
            "/phones/sync-commands",
            Some(body),
        )
        .await
    }

    async fn install_apk(&self, phone_id: &str, apk: &ObsPath) -> VendorCall<CphJobs> {
        let body = json!({
            "command": "install",
            "content": format!("-t -r {}", apk.uri()),
            "phone_ids": [phone_id],
        });
        self.request("install_apk", Method::POST, "/phones/commands", Some(body))
            .await
    }

    async fn uninstall_apk(&self, phone_id: &str, package_name: &str) -> VendorCall<CphJobs> {
        let body = json!({
            "command": "uninstall",
            "content": package_name,
            "phone_ids": [phone_id],
        });
        self.request(
            "uninstall_apk",
            Method::POST,
            "/phones/commands",
            Some(body),
        )
        .await
    }

    async fn push_file(
        &self,
        phone_id: &str,
        archive: &ObsPath,
        target_dir: &str,
    ) -> VendorCall<CphJobs> {
        let body = json!({
            "command": "push",
            "content": format!("-t {} {}", target_dir, archive.uri()),
            "phone_ids": [phone_id],
        });
        self.request("push_file", Method::POST, "/phones/commands", Some(body))
            .await
    }

    async fn export_data(
        &self,
        phone_id: &str,
        remote_path: &str,
        target: &ObsPath,
    ) -> VendorCall<CphJobs> {
        let body = json!({
            "bucket_name": target.bucket,
            "object_path": target.object,
            "include_files": [remote_path],
        });
        self.request(
            "export_data",
            Method::POST,
            &format!("/phones/{}/export-data", phone_id),
            Some(body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let config = CphConfig::new(
            "https://cph.cn-north-4.myhuaweicloud.com/",
            "proj-1",
            "token",
        );
        let client = HuaweiCphClient::new(config, Arc::new(RateLimiter::new())).unwrap();
        assert_eq!(
            client.url("/phones/p-1"),
            "https://cph.cn-north-4.myhuaweicloud.com/v1/proj-1/cloud-phone/phones/p-1"
        );
    }

    #[test]
    fn test_rejects_incomplete_config() {
        let config = CphConfig::new("https://cph.example.com", "", "token");
        assert!(matches!(
            HuaweiCphClient::new(config, Arc::new(RateLimiter::new())),
            Err(HuaweiError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let mut config = CphConfig::new("http://127.0.0.1:1", "proj-1", "token");
        config.retry = phonefleet_provider::RetryPolicy::vendor().with_max_attempts(1);
        let client = HuaweiCphClient::new(config, Arc::new(RateLimiter::new())).unwrap();

        let err = client.get_phone("p-1").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transient { .. } | ProviderError::Timeout(_)
        ));
    }
}
