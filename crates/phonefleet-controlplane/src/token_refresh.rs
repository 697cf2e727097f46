//! Connection credential refresh
//!
//! Cloud vendors hand out short-lived streaming credentials (Aliyun tokens
//! expire after 30 s). Running devices get fresh connection info on a
//! per-vendor cadence.

use crate::device::{Device, DeviceFilter, FieldUpdate};
use crate::error::{ControlPlaneError, Result};
use crate::repository::DeviceRepository;
use crate::stats::{CycleGuard, DeviceOutcome, SyncReport, SyncStats};
use crate::status_sync::DEFAULT_CONCURRENCY;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use phonefleet_provider::{
    ConnectionInfo, DeviceProvider, DeviceStatus, ProviderRegistry, ProviderType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Refresh cadence for a provider, `None` when its credentials never expire
pub fn default_refresh_interval(provider_type: ProviderType) -> Option<Duration> {
    match provider_type {
        ProviderType::AliyunEcp => Some(Duration::from_secs(10)),
        ProviderType::HuaweiCph => Some(Duration::from_secs(300)),
        ProviderType::Redroid | ProviderType::Physical => None,
    }
}

pub struct TokenRefreshService {
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn DeviceRepository>,
    concurrency: usize,
    cycles: CycleGuard,
}

impl TokenRefreshService {
    pub fn new(registry: Arc<ProviderRegistry>, repository: Arc<dyn DeviceRepository>) -> Self {
        Self {
            registry,
            repository,
            concurrency: DEFAULT_CONCURRENCY,
            cycles: CycleGuard::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn refresh_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::new();
        for provider_type in self.registry.cloud_types() {
            match self.refresh_provider(provider_type).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(provider = %provider_type, error = %e, "Token refresh cycle failed");
                }
            }
        }
        reports
    }

    /// Refresh every running device of one cloud provider
    pub async fn refresh_provider(&self, provider_type: ProviderType) -> Result<SyncReport> {
        if !provider_type.is_cloud() {
            return Err(ControlPlaneError::UnsupportedProvider(provider_type));
        }
        let Some(_permit) = self.cycles.try_enter(provider_type) else {
            tracing::debug!(provider = %provider_type, "Token refresh already running, skipping cycle");
            return Ok(SyncReport::overlapped(provider_type));
        };
        let provider = self.registry.get(provider_type)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let filter = DeviceFilter::new()
            .provider(provider_type)
            .status_in([DeviceStatus::Running]);
        let (candidates, missing): (Vec<Device>, Vec<Device>) = self
            .repository
            .find(&filter)
            .await?
            .into_iter()
            .partition(|d| d.external_id.is_some());

        let mut stats = SyncStats {
            skipped: missing.len(),
            ..Default::default()
        };
        let outcomes: Vec<DeviceOutcome> = stream::iter(candidates)
            .map(|device| self.refresh(provider.as_ref(), device))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for outcome in &outcomes {
            stats.record(outcome);
        }

        let report = SyncReport {
            provider: provider_type,
            started_at,
            duration: started.elapsed(),
            stats,
            overlapped: false,
        };
        // Aliyun は 10 秒毎に回るので debug に留める
        tracing::debug!(
            provider = %provider_type,
            checked = stats.checked,
            updated = stats.updated,
            failed = stats.failed,
            "Token refresh completed"
        );
        if stats.failed > 0 {
            tracing::info!(
                provider = %provider_type,
                failed = stats.failed,
                checked = stats.checked,
                "Token refresh completed with failures"
            );
        }
        Ok(report)
    }

    /// Refresh one device on demand and return the stored connection info
    pub async fn refresh_device_token(&self, device_id: &str) -> Result<ConnectionInfo> {
        let device = self
            .repository
            .find_one(device_id)
            .await?
            .ok_or_else(|| ControlPlaneError::DeviceNotFound(device_id.to_string()))?;

        let provider_type = device.provider_type;
        if !provider_type.is_cloud() || !self.registry.is_available(provider_type) {
            return Err(ControlPlaneError::UnsupportedProvider(provider_type));
        }
        let provider = self.registry.get(provider_type)?;

        let (info, _) = self.apply(provider.as_ref(), device).await?;
        Ok(info)
    }

    async fn refresh(&self, provider: &dyn DeviceProvider, device: Device) -> DeviceOutcome {
        let device_id = device.id.clone();
        match self.apply(provider, device).await {
            Ok((_, true)) => DeviceOutcome::Updated,
            Ok((_, false)) => DeviceOutcome::Unchanged,
            Err(e) => {
                tracing::warn!(
                    device_id = %device_id,
                    provider = %provider.provider_type(),
                    error = %e,
                    "Failed to refresh connection info"
                );
                DeviceOutcome::Failed
            }
        }
    }

    /// Fetch, combine with the current record's info and persist when it changed
    ///
    /// Only `connection_info` is rewritten, so a concurrent status sync is
    /// never undone.
    async fn apply(
        &self,
        provider: &dyn DeviceProvider,
        device: Device,
    ) -> Result<(ConnectionInfo, bool)> {
        let external_id = device
            .external_id
            .clone()
            .ok_or_else(|| ControlPlaneError::MissingExternalId(device.id.clone()))?;

        let fresh = provider.get_connection_info(&external_id).await?;
        match self
            .repository
            .update_connection_info(&device.id, fresh)
            .await?
        {
            FieldUpdate::Updated { current, .. } => {
                tracing::debug!(
                    device_id = %device.id,
                    provider = %device.provider_type,
                    expires_at = ?current.expires_at(),
                    "Connection info refreshed"
                );
                Ok((current, true))
            }
            FieldUpdate::Unchanged(info) => Ok((info, false)),
            FieldUpdate::Missing => Err(ControlPlaneError::DeviceNotFound(device.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryDeviceRepository;
    use crate::testing::MockProvider;
    use phonefleet_provider::{HuaweiConnection, ProviderError};

    fn huawei(ticket: &str) -> ConnectionInfo {
        ConnectionInfo::HuaweiCph(HuaweiConnection {
            instance_id: "phone-1".into(),
            access_ip: "1.2.3.4".into(),
            access_port: 8443,
            session_id: "s".into(),
            ticket: ticket.into(),
            expires_at: None,
        })
    }

    #[test]
    fn test_default_intervals() {
        assert_eq!(
            default_refresh_interval(ProviderType::AliyunEcp),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            default_refresh_interval(ProviderType::HuaweiCph),
            Some(Duration::from_secs(300))
        );
        assert_eq!(default_refresh_interval(ProviderType::Redroid), None);
    }

    #[tokio::test]
    async fn test_unchanged_info_is_not_saved() {
        let provider = MockProvider::new(ProviderType::HuaweiCph).with_connection("phone-1", huawei("t1"));
        let device = Device::new("a", ProviderType::HuaweiCph)
            .with_external_id("phone-1")
            .with_status(DeviceStatus::Running)
            .with_connection_info(huawei("t1"));

        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(provider));
        let repo = Arc::new(InMemoryDeviceRepository::with_devices([device]));
        let service = TokenRefreshService::new(registry, repo.clone());

        let report = service.refresh_provider(ProviderType::HuaweiCph).await.unwrap();
        assert_eq!(report.stats.unchanged, 1);
        assert_eq!(repo.save_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_refresh_errors() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(
            MockProvider::new(ProviderType::HuaweiCph)
                .with_connection_error("phone-1", ProviderError::transient("Busy", "try later")),
        ));
        let device = Device::new("a", ProviderType::HuaweiCph)
            .with_external_id("phone-1")
            .with_status(DeviceStatus::Running);
        let id = device.id.clone();
        let repo = Arc::new(InMemoryDeviceRepository::with_devices([device]));
        let service = TokenRefreshService::new(registry, repo.clone());

        assert!(matches!(
            service.refresh_device_token(&id).await,
            Err(ControlPlaneError::Provider(ProviderError::Transient { .. }))
        ));
        assert!(matches!(
            service.refresh_device_token("nope").await,
            Err(ControlPlaneError::DeviceNotFound(_))
        ));
        assert_eq!(repo.save_count(), 0);
    }
}
