//! Scriptable provider for control plane tests

use async_trait::async_trait;
use phonefleet_provider::{
    ConnectionInfo, DeviceCapabilities, DeviceCreateConfig, DeviceProvider, DeviceStatus,
    ProviderDevice, ProviderError, ProviderType, Result, RetryPolicy,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Answers `get_status` / `get_connection_info` from scripted tables
///
/// Unknown external ids answer with a terminal `InstanceNotFound`.
pub struct MockProvider {
    provider_type: ProviderType,
    capabilities: DeviceCapabilities,
    statuses: Mutex<HashMap<String, Result<DeviceStatus>>>,
    connections: Mutex<HashMap<String, Result<ConnectionInfo>>>,
    delay: Option<Duration>,
    retry: Option<RetryPolicy>,
    status_calls: AtomicUsize,
    connection_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            capabilities: DeviceCapabilities::default(),
            statuses: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            delay: None,
            retry: None,
            status_calls: AtomicUsize::new(0),
            connection_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_status(self, external_id: &str, status: DeviceStatus) -> Self {
        self.set_status(external_id, status);
        self
    }

    pub fn with_status_error(self, external_id: &str, error: ProviderError) -> Self {
        self.set_status_error(external_id, error);
        self
    }

    pub fn with_connection(self, external_id: &str, info: ConnectionInfo) -> Self {
        self.set_connection(external_id, info);
        self
    }

    pub fn with_connection_error(self, external_id: &str, error: ProviderError) -> Self {
        self.lock_connections().insert(external_id.to_string(), Err(error));
        self
    }

    /// Every vendor call sleeps this long first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Route `get_status` through `policy` the way vendor adapters do
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn set_status(&self, external_id: &str, status: DeviceStatus) {
        self.lock_statuses().insert(external_id.to_string(), Ok(status));
    }

    pub fn set_status_error(&self, external_id: &str, error: ProviderError) {
        self.lock_statuses().insert(external_id.to_string(), Err(error));
    }

    pub fn set_connection(&self, external_id: &str, info: ConnectionInfo) {
        self.lock_connections().insert(external_id.to_string(), Ok(info));
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn connection_calls(&self) -> usize {
        self.connection_calls.load(Ordering::SeqCst)
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, HashMap<String, Result<DeviceStatus>>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_connections(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Result<ConnectionInfo>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn answer_status(&self, device_id: &str) -> Result<DeviceStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.lock_statuses()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| Err(Self::not_found(device_id)))
    }

    fn not_found(external_id: &str) -> ProviderError {
        ProviderError::terminal("InstanceNotFound", format!("no such instance {}", external_id))
    }
}

#[async_trait]
impl DeviceProvider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn create(&self, _config: &DeviceCreateConfig) -> Result<ProviderDevice> {
        Err(ProviderError::not_supported(self.provider_type, "create"))
    }

    async fn start(&self, _device_id: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _device_id: &str) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, _device_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus> {
        match &self.retry {
            Some(policy) => policy.execute(|| self.answer_status(device_id)).await,
            None => self.answer_status(device_id).await,
        }
    }

    async fn get_connection_info(&self, device_id: &str) -> Result<ConnectionInfo> {
        self.connection_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.lock_connections()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| Err(Self::not_found(device_id)))
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}
