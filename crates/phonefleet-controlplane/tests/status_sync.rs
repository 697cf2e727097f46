//! Status reconciliation across devices

use phonefleet_controlplane::testing::MockProvider;
use phonefleet_controlplane::{
    ControlPlaneError, Device, DeviceRepository, InMemoryDeviceRepository, StatusSyncService,
};
use phonefleet_provider::{
    DeviceStatus, ProviderError, ProviderRegistry, ProviderType, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

fn device(name: &str, provider: ProviderType, external_id: &str, status: DeviceStatus) -> Device {
    Device::new(name, provider)
        .with_external_id(external_id)
        .with_status(status)
}

fn setup(
    providers: Vec<MockProvider>,
    devices: Vec<Device>,
) -> (Arc<StatusSyncService>, Arc<InMemoryDeviceRepository>) {
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(Arc::new(provider));
    }
    let repo = Arc::new(InMemoryDeviceRepository::with_devices(devices));
    (
        Arc::new(StatusSyncService::new(registry, repo.clone())),
        repo,
    )
}

#[tokio::test]
async fn one_failing_device_does_not_block_the_others() {
    let provider = MockProvider::new(ProviderType::HuaweiCph)
        .with_status("a", DeviceStatus::Stopped)
        .with_status_error("b", ProviderError::terminal("InstanceNotFound", "gone"))
        .with_status("c", DeviceStatus::Stopped);

    let a = device("a", ProviderType::HuaweiCph, "a", DeviceStatus::Running);
    let b = device("b", ProviderType::HuaweiCph, "b", DeviceStatus::Running);
    let c = device("c", ProviderType::HuaweiCph, "c", DeviceStatus::Running);
    let ids = [a.id.clone(), b.id.clone(), c.id.clone()];
    let b_before = b.clone();

    let (service, repo) = setup(vec![provider], vec![a, b, c]);
    let report = service
        .sync_provider(ProviderType::HuaweiCph)
        .await
        .unwrap();

    assert_eq!(report.stats.checked, 3);
    assert_eq!(report.stats.updated, 2);
    assert_eq!(report.stats.failed, 1);

    let a = repo.find_one(&ids[0]).await.unwrap().unwrap();
    let b = repo.find_one(&ids[1]).await.unwrap().unwrap();
    let c = repo.find_one(&ids[2]).await.unwrap().unwrap();
    assert_eq!(a.status, DeviceStatus::Stopped);
    assert_eq!(c.status, DeviceStatus::Stopped);
    assert_eq!(b, b_before);
    assert_eq!(repo.save_count(), 2);
}

#[tokio::test]
async fn matching_status_causes_no_writes() {
    let provider = MockProvider::new(ProviderType::AliyunEcp)
        .with_status("acp-1", DeviceStatus::Running)
        .with_status("acp-2", DeviceStatus::Stopped);
    let devices = vec![
        device("x", ProviderType::AliyunEcp, "acp-1", DeviceStatus::Running),
        device("y", ProviderType::AliyunEcp, "acp-2", DeviceStatus::Stopped),
    ];
    let (service, repo) = setup(vec![provider], devices);

    for _ in 0..3 {
        let report = service
            .sync_provider(ProviderType::AliyunEcp)
            .await
            .unwrap();
        assert_eq!(report.stats.unchanged, 2);
    }
    assert_eq!(repo.save_count(), 0);
}

#[tokio::test]
async fn second_cycle_after_update_is_idempotent() {
    let provider = MockProvider::new(ProviderType::HuaweiCph)
        .with_status("p1", DeviceStatus::Stopped);
    let devices = vec![device("x", ProviderType::HuaweiCph, "p1", DeviceStatus::Running)];
    let (service, repo) = setup(vec![provider], devices);

    service.sync_provider(ProviderType::HuaweiCph).await.unwrap();
    service.sync_provider(ProviderType::HuaweiCph).await.unwrap();
    assert_eq!(repo.save_count(), 1);
}

#[tokio::test]
async fn sync_all_covers_only_cloud_providers() {
    let huawei = MockProvider::new(ProviderType::HuaweiCph).with_status("h", DeviceStatus::Stopped);
    let aliyun = MockProvider::new(ProviderType::AliyunEcp).with_status("a", DeviceStatus::Stopped);
    let redroid = MockProvider::new(ProviderType::Redroid).with_status("r", DeviceStatus::Stopped);
    let devices = vec![
        device("h", ProviderType::HuaweiCph, "h", DeviceStatus::Running),
        device("a", ProviderType::AliyunEcp, "a", DeviceStatus::Running),
        device("r", ProviderType::Redroid, "r", DeviceStatus::Running),
    ];
    let (service, repo) = setup(vec![huawei, aliyun, redroid], devices);

    let reports = service.sync_all().await;
    let providers: Vec<_> = reports.iter().map(|r| r.provider).collect();
    assert_eq!(providers, vec![ProviderType::HuaweiCph, ProviderType::AliyunEcp]);
    assert_eq!(repo.save_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycle_is_skipped() {
    let provider = MockProvider::new(ProviderType::AliyunEcp)
        .with_status("acp-1", DeviceStatus::Stopped)
        .with_delay(Duration::from_secs(5));
    let devices = vec![device("x", ProviderType::AliyunEcp, "acp-1", DeviceStatus::Running)];
    let (service, _repo) = setup(vec![provider], devices);

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.sync_provider(ProviderType::AliyunEcp).await }
    });
    // 最初のサイクルが get_status で待機するまで進める
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = service
        .sync_provider(ProviderType::AliyunEcp)
        .await
        .unwrap();
    assert!(second.overlapped);
    assert_eq!(second.stats.checked, 0);

    let first = first.await.unwrap().unwrap();
    assert!(!first.overlapped);
    assert_eq!(first.stats.updated, 1);
}

#[tokio::test]
async fn manual_trigger_errors() {
    let provider = MockProvider::new(ProviderType::HuaweiCph);
    let without_id = Device::new("no-id", ProviderType::HuaweiCph).with_status(DeviceStatus::Running);
    let redroid = device("r", ProviderType::Redroid, "c1", DeviceStatus::Running);
    let aliyun = device("a", ProviderType::AliyunEcp, "acp-1", DeviceStatus::Running);
    let ids = (without_id.id.clone(), redroid.id.clone(), aliyun.id.clone());
    let (service, _repo) = setup(vec![provider], vec![without_id, redroid, aliyun]);

    assert!(matches!(
        service.sync_device_status("missing").await,
        Err(ControlPlaneError::DeviceNotFound(_))
    ));
    assert!(matches!(
        service.sync_device_status(&ids.0).await,
        Err(ControlPlaneError::MissingExternalId(_))
    ));
    assert!(matches!(
        service.sync_device_status(&ids.1).await,
        Err(ControlPlaneError::UnsupportedProvider(ProviderType::Redroid))
    ));
    // 未登録のクラウドプロバイダ
    assert!(matches!(
        service.sync_device_status(&ids.2).await,
        Err(ControlPlaneError::UnsupportedProvider(ProviderType::AliyunEcp))
    ));
}

#[tokio::test(start_paused = true)]
async fn terminal_vendor_error_is_attempted_once() {
    let provider = Arc::new(
        MockProvider::new(ProviderType::HuaweiCph)
            .with_status("a", DeviceStatus::Stopped)
            .with_status_error("b", ProviderError::terminal("InstanceNotFound", "gone"))
            .with_retry(RetryPolicy::vendor().without_jitter()),
    );
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(provider.clone());

    let a = device("a", ProviderType::HuaweiCph, "a", DeviceStatus::Running);
    let b = device("b", ProviderType::HuaweiCph, "b", DeviceStatus::Running);
    let b_id = b.id.clone();
    let repo = Arc::new(InMemoryDeviceRepository::with_devices(vec![a, b]));
    let service = StatusSyncService::new(registry, repo.clone());

    let started = tokio::time::Instant::now();
    let report = service
        .sync_provider(ProviderType::HuaweiCph)
        .await
        .unwrap();

    // b は再試行されない
    assert_eq!(provider.status_calls(), 2);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(report.stats.updated, 1);
    assert_eq!(report.stats.failed, 1);
    let b = repo.find_one(&b_id).await.unwrap().unwrap();
    assert_eq!(b.status, DeviceStatus::Running);
    assert_eq!(repo.save_count(), 1);

    // 一時的なエラーはバックオフ付きで再試行される
    provider.set_status_error("b", ProviderError::transient("ServiceUnavailable", "busy"));
    let before = provider.status_calls();
    let report = service
        .sync_provider(ProviderType::HuaweiCph)
        .await
        .unwrap();
    assert_eq!(report.stats.failed, 1);
    assert_eq!(provider.status_calls() - before, 1 + 3);
}
