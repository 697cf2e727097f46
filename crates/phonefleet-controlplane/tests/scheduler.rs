//! Scheduler loops under a paused clock

use phonefleet_controlplane::testing::MockProvider;
use phonefleet_controlplane::{
    ControlPlaneError, Device, InMemoryDeviceRepository, Scheduler, SchedulerConfig,
    StatusSyncService, TokenRefreshService,
};
use phonefleet_provider::{
    AliyunConnection, ConnectionInfo, DeviceStatus, ProviderRegistry, ProviderType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn loops_run_on_their_own_cadence_until_shutdown() {
    let provider = Arc::new(
        MockProvider::new(ProviderType::AliyunEcp)
            .with_status("acp-1", DeviceStatus::Running)
            .with_connection(
                "acp-1",
                ConnectionInfo::AliyunEcp(AliyunConnection {
                    instance_id: "acp-1".to_string(),
                    webrtc: None,
                    adb: None,
                }),
            ),
    );
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(provider.clone());

    let device = Device::new("x", ProviderType::AliyunEcp)
        .with_external_id("acp-1")
        .with_status(DeviceStatus::Running);
    let repo = Arc::new(InMemoryDeviceRepository::with_devices([device]));

    let status_sync = Arc::new(StatusSyncService::new(registry.clone(), repo.clone()));
    let token_refresh = Arc::new(TokenRefreshService::new(registry, repo));
    let mut refresh_intervals = BTreeMap::new();
    refresh_intervals.insert(ProviderType::AliyunEcp, Duration::from_secs(10));
    let config = SchedulerConfig {
        status_interval: Duration::from_secs(60),
        refresh_intervals,
    };

    let mut scheduler = Scheduler::new(status_sync, token_refresh, config);
    scheduler.start().unwrap();

    // t=0, 10, 20, 30, 40, 50 の refresh と t=0 の status sync
    tokio::time::sleep(Duration::from_secs(55)).await;
    assert_eq!(provider.status_calls(), 1);
    assert_eq!(provider.connection_calls(), 6);

    scheduler.shutdown().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(provider.status_calls(), 1);
    assert_eq!(provider.connection_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn zero_status_interval_fails_to_start() {
    let provider = Arc::new(MockProvider::new(ProviderType::HuaweiCph));
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(provider.clone());
    let repo = Arc::new(InMemoryDeviceRepository::new());

    let status_sync = Arc::new(StatusSyncService::new(registry.clone(), repo.clone()));
    let token_refresh = Arc::new(TokenRefreshService::new(registry, repo));
    let config = SchedulerConfig {
        status_interval: Duration::ZERO,
        refresh_intervals: BTreeMap::new(),
    };

    let mut scheduler = Scheduler::new(status_sync, token_refresh, config);
    assert!(matches!(
        scheduler.start(),
        Err(ControlPlaneError::InvalidSchedule(_))
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(provider.status_calls(), 0);
    scheduler.shutdown().await;
}
