//! Device status reconciliation
//!
//! Pulls the authoritative status of every running or stopped cloud device
//! and rewrites local records that diverge. Failures are isolated per
//! device: one bad device never blocks the rest of the cycle.

use crate::device::{Device, DeviceFilter, FieldUpdate};
use crate::error::{ControlPlaneError, Result};
use crate::repository::DeviceRepository;
use crate::stats::{CycleGuard, DeviceOutcome, SyncOutcome, SyncReport, SyncStats};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use phonefleet_provider::{DeviceProvider, DeviceStatus, ProviderRegistry, ProviderType};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Statuses whose records are reconciled each cycle
const SYNCED_STATUSES: [DeviceStatus; 2] = [DeviceStatus::Running, DeviceStatus::Stopped];

pub struct StatusSyncService {
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn DeviceRepository>,
    concurrency: usize,
    cycles: CycleGuard,
}

impl StatusSyncService {
    pub fn new(registry: Arc<ProviderRegistry>, repository: Arc<dyn DeviceRepository>) -> Self {
        Self {
            registry,
            repository,
            concurrency: DEFAULT_CONCURRENCY,
            cycles: CycleGuard::new(),
        }
    }

    /// Max devices queried at once within a cycle
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one cycle for every registered cloud provider
    pub async fn sync_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::new();
        for provider_type in self.registry.cloud_types() {
            match self.sync_provider(provider_type).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(provider = %provider_type, error = %e, "Status sync cycle failed");
                }
            }
        }
        reports
    }

    /// Run one cycle for a single cloud provider
    ///
    /// Returns an `overlapped` report without doing anything when a cycle for
    /// the same provider is still running.
    pub async fn sync_provider(&self, provider_type: ProviderType) -> Result<SyncReport> {
        if !provider_type.is_cloud() {
            return Err(ControlPlaneError::UnsupportedProvider(provider_type));
        }
        let Some(_permit) = self.cycles.try_enter(provider_type) else {
            tracing::debug!(provider = %provider_type, "Status sync already running, skipping cycle");
            return Ok(SyncReport::overlapped(provider_type));
        };
        let provider = self.registry.get(provider_type)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let filter = DeviceFilter::new()
            .provider(provider_type)
            .status_in(SYNCED_STATUSES);
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
        for device in &missing {
            tracing::debug!(device_id = %device.id, provider = %provider_type, "No external id, skipping");
        }

        let outcomes: Vec<DeviceOutcome> = stream::iter(candidates)
            .map(|device| self.reconcile(provider.as_ref(), device))
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
        tracing::info!(
            provider = %provider_type,
            checked = stats.checked,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Status sync completed"
        );
        Ok(report)
    }

    /// Reconcile a single device on demand
    pub async fn sync_device_status(&self, device_id: &str) -> Result<SyncOutcome> {
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

        self.apply(provider.as_ref(), device).await
    }

    async fn reconcile(&self, provider: &dyn DeviceProvider, device: Device) -> DeviceOutcome {
        let device_id = device.id.clone();
        match self.apply(provider, device).await {
            Ok(SyncOutcome::Updated { .. }) => DeviceOutcome::Updated,
            Ok(SyncOutcome::Unchanged(_)) => DeviceOutcome::Unchanged,
            Err(e) => {
                tracing::warn!(
                    device_id = %device_id,
                    provider = %provider.provider_type(),
                    error = %e,
                    "Failed to sync device status"
                );
                DeviceOutcome::Failed
            }
        }
    }

    /// Fetch the status and rewrite only that field of the current record
    async fn apply(&self, provider: &dyn DeviceProvider, device: Device) -> Result<SyncOutcome> {
        let external_id = device
            .external_id
            .clone()
            .ok_or_else(|| ControlPlaneError::MissingExternalId(device.id.clone()))?;

        let status = provider.get_status(&external_id).await?;
        match self.repository.update_status(&device.id, status).await? {
            FieldUpdate::Updated { previous, current } => {
                tracing::info!(
                    device_id = %device.id,
                    provider = %device.provider_type,
                    from = %previous,
                    to = %current,
                    "Device status changed"
                );
                Ok(SyncOutcome::Updated {
                    from: previous,
                    to: current,
                })
            }
            FieldUpdate::Unchanged(status) => Ok(SyncOutcome::Unchanged(status)),
            // 同期中に削除された
            FieldUpdate::Missing => Err(ControlPlaneError::DeviceNotFound(device.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryDeviceRepository;
    use crate::testing::MockProvider;
    use phonefleet_provider::ProviderError;

    fn service(
        provider: MockProvider,
        devices: Vec<Device>,
    ) -> (StatusSyncService, Arc<InMemoryDeviceRepository>) {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(provider));
        let repo = Arc::new(InMemoryDeviceRepository::with_devices(devices));
        (StatusSyncService::new(registry, repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_devices_without_external_id_are_skipped() {
        let provider = MockProvider::new(ProviderType::HuaweiCph);
        let device = Device::new("a", ProviderType::HuaweiCph).with_status(DeviceStatus::Running);
        let (service, repo) = service(provider, vec![device]);

        let report = service.sync_provider(ProviderType::HuaweiCph).await.unwrap();
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.checked, 0);
        assert_eq!(repo.save_count(), 0);
    }

    #[tokio::test]
    async fn test_creating_devices_are_not_candidates() {
        let provider = MockProvider::new(ProviderType::HuaweiCph).with_status("ext-1", DeviceStatus::Running);
        let device = Device::new("a", ProviderType::HuaweiCph).with_external_id("ext-1");
        let (service, repo) = service(provider, vec![device]);

        let report = service.sync_provider(ProviderType::HuaweiCph).await.unwrap();
        assert_eq!(report.stats, SyncStats::default());
        assert_eq!(repo.save_count(), 0);
    }

    #[tokio::test]
    async fn test_non_cloud_provider_rejected() {
        let (service, _) = service(MockProvider::new(ProviderType::Redroid), vec![]);
        assert!(matches!(
            service.sync_provider(ProviderType::Redroid).await,
            Err(ControlPlaneError::UnsupportedProvider(ProviderType::Redroid))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_cloud_provider() {
        let (service, _) = service(MockProvider::new(ProviderType::HuaweiCph), vec![]);
        assert!(matches!(
            service.sync_provider(ProviderType::AliyunEcp).await,
            Err(ControlPlaneError::Provider(ProviderError::NotRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn test_manual_sync_updates_record() {
        let provider = MockProvider::new(ProviderType::AliyunEcp).with_status("acp-1", DeviceStatus::Stopped);
        let device = Device::new("a", ProviderType::AliyunEcp)
            .with_external_id("acp-1")
            .with_status(DeviceStatus::Running);
        let id = device.id.clone();
        let (service, repo) = service(provider, vec![device]);

        let outcome = service.sync_device_status(&id).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                from: DeviceStatus::Running,
                to: DeviceStatus::Stopped
            }
        );
        let stored = repo.find_one(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Stopped);

        // 2回目は変化なし
        assert_eq!(
            service.sync_device_status(&id).await.unwrap(),
            SyncOutcome::Unchanged(DeviceStatus::Stopped)
        );
        assert_eq!(repo.save_count(), 1);
    }
}
