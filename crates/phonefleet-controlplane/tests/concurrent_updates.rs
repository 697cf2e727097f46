//! Status sync and token refresh writing the same record concurrently

use chrono::{Duration as ChronoDuration, Utc};
use phonefleet_controlplane::testing::MockProvider;
use phonefleet_controlplane::{
    Device, DeviceRepository, InMemoryDeviceRepository, StatusSyncService, TokenRefreshService,
};
use phonefleet_provider::{
    AliyunConnection, ConnectionInfo, DeviceStatus, ProviderRegistry, ProviderType, WebRtcChannel,
};
use std::sync::Arc;
use std::time::Duration;

fn aliyun(token: &str) -> ConnectionInfo {
    ConnectionInfo::AliyunEcp(AliyunConnection {
        instance_id: "acp-1".to_string(),
        webrtc: Some(WebRtcChannel {
            token: token.to_string(),
            url: String::new(),
            expires_at: Utc::now() + ChronoDuration::seconds(30),
        }),
        adb: None,
    })
}

fn token_of(device: &Device) -> String {
    match &device.connection_info {
        Some(ConnectionInfo::AliyunEcp(conn)) => conn
            .webrtc
            .as_ref()
            .map(|w| w.token.clone())
            .unwrap_or_default(),
        other => panic!("unexpected connection info: {:?}", other),
    }
}

struct Fixture {
    status_sync: StatusSyncService,
    token_refresh: TokenRefreshService,
    repo: Arc<InMemoryDeviceRepository>,
    device_id: String,
}

/// Vendor says Stopped with a fresh token; the store still has Running and a stale one
fn fixture() -> Fixture {
    let provider = MockProvider::new(ProviderType::AliyunEcp)
        .with_status("acp-1", DeviceStatus::Stopped)
        .with_connection("acp-1", aliyun("fresh"))
        .with_delay(Duration::from_secs(5));
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(provider));

    let device = Device::new("x", ProviderType::AliyunEcp)
        .with_external_id("acp-1")
        .with_status(DeviceStatus::Running)
        .with_connection_info(aliyun("stale"));
    let device_id = device.id.clone();
    let repo = Arc::new(InMemoryDeviceRepository::with_devices([device]));

    Fixture {
        status_sync: StatusSyncService::new(registry.clone(), repo.clone()),
        token_refresh: TokenRefreshService::new(registry, repo.clone()),
        repo,
        device_id,
    }
}

#[tokio::test(start_paused = true)]
async fn status_sync_saving_last_keeps_refreshed_token() {
    let f = fixture();

    // refresh は t=5s、sync は t=6s に書き込む
    let refresh = f.token_refresh.refresh_provider(ProviderType::AliyunEcp);
    let sync = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.status_sync.sync_provider(ProviderType::AliyunEcp).await
    };
    let (refreshed, synced) = tokio::join!(refresh, sync);
    assert_eq!(refreshed.unwrap().stats.updated, 1);
    assert_eq!(synced.unwrap().stats.updated, 1);

    let stored = f.repo.find_one(&f.device_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeviceStatus::Stopped);
    assert_eq!(token_of(&stored), "fresh");
}

#[tokio::test(start_paused = true)]
async fn token_refresh_saving_last_keeps_reconciled_status() {
    let f = fixture();

    // sync は t=5s、refresh は t=6s に書き込む
    let sync = f.status_sync.sync_provider(ProviderType::AliyunEcp);
    let refresh = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.token_refresh.refresh_provider(ProviderType::AliyunEcp).await
    };
    let (synced, refreshed) = tokio::join!(sync, refresh);
    assert_eq!(synced.unwrap().stats.updated, 1);
    assert_eq!(refreshed.unwrap().stats.updated, 1);

    let stored = f.repo.find_one(&f.device_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeviceStatus::Stopped);
    assert_eq!(token_of(&stored), "fresh");
    assert_eq!(f.repo.save_count(), 2);
}
