//! 設定からプロバイダとスケジューラを組み立てる

use anyhow::{Context, Result};
use phonefleet_aliyun::{AliyunDefaults, AliyunEcpClient, AliyunProvider, EcpConfig};
use phonefleet_config::{
    AliyunSettings, CallSettings, FleetConfig, HuaweiSettings, PhysicalSettings,
    ProviderSettings, RedroidSettings,
};
use phonefleet_controlplane::{SchedulerConfig, default_refresh_interval};
use phonefleet_huawei::{CphConfig, HuaweiCphClient, HuaweiProvider};
use phonefleet_physical::{DevicePool, PhysicalDevice, PhysicalProvider};
use phonefleet_provider::{
    Adb, DeviceProvider, ProviderRegistry, RateLimitConfig, RateLimiter, RetryPolicy,
};
use phonefleet_redroid::{PortRange, RedroidConfig, RedroidProvider};
use std::sync::Arc;
use std::time::Duration;

/// Register every configured provider; all vendor clients share one limiter
pub fn build_registry(config: &FleetConfig, limiter: Arc<RateLimiter>) -> Result<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    for settings in &config.providers {
        let provider = build_provider(settings, limiter.clone())
            .with_context(|| format!("{} の初期化に失敗しました", settings.provider_type()))?;
        registry.register(provider);
    }
    Ok(registry)
}

fn build_provider(
    settings: &ProviderSettings,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn DeviceProvider>> {
    let provider: Arc<dyn DeviceProvider> = match settings {
        ProviderSettings::HuaweiCph(s) => Arc::new(huawei_provider(s, limiter)?),
        ProviderSettings::AliyunEcp(s) => Arc::new(aliyun_provider(s, limiter)?),
        ProviderSettings::Redroid(s) => Arc::new(redroid_provider(s)?),
        ProviderSettings::Physical(s) => Arc::new(physical_provider(s)?),
    };
    Ok(provider)
}

struct CallOverrides<'a>(&'a CallSettings);

impl CallOverrides<'_> {
    fn apply(
        &self,
        rate_limit: &mut RateLimitConfig,
        retry: &mut RetryPolicy,
        call_timeout: &mut Duration,
        token_timeout: &mut Duration,
    ) {
        if let Some(rate) = self.0.rate_limit {
            *rate_limit = rate;
        }
        if let Some(policy) = &self.0.retry {
            *retry = policy.clone();
        }
        if let Some(timeout) = self.0.call_timeout {
            *call_timeout = timeout;
        }
        if let Some(timeout) = self.0.token_timeout {
            *token_timeout = timeout;
        }
    }
}

fn huawei_provider(s: &HuaweiSettings, limiter: Arc<RateLimiter>) -> Result<HuaweiProvider> {
    let endpoint = match (&s.endpoint, &s.region) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, Some(region)) => CphConfig::endpoint_for_region(region),
        (None, None) => anyhow::bail!("huawei_cph requires endpoint or region"),
    };

    let mut config = CphConfig::new(endpoint, &s.project_id, &s.auth_token);
    config.default_server_id = s.default_server_id.clone();
    config.default_image_id = s.default_image_id.clone();
    CallOverrides(&s.call).apply(
        &mut config.rate_limit,
        &mut config.retry,
        &mut config.call_timeout,
        &mut config.token_timeout,
    );

    tracing::debug!(endpoint = %config.endpoint, "Huawei CPH client configured");
    let client = HuaweiCphClient::new(config, limiter)?;
    Ok(HuaweiProvider::new(Arc::new(client))
        .with_defaults(s.default_server_id.clone(), s.default_image_id.clone()))
}

fn aliyun_provider(s: &AliyunSettings, limiter: Arc<RateLimiter>) -> Result<AliyunProvider> {
    let endpoint = s
        .endpoint
        .clone()
        .unwrap_or_else(|| EcpConfig::endpoint_for_region(&s.region_id));

    let mut config = EcpConfig::new(endpoint, &s.region_id, &s.access_key_id);
    config.security_token = s.security_token.clone();
    config.default_image_id = s.image_id.clone();
    config.default_office_site_id = s.office_site_id.clone();
    config.default_vswitch_id = s.vswitch_id.clone();
    config.backup_path = s.backup_path.clone();
    if let Some(rate) = s.ticket_rate_limit {
        config.ticket_rate_limit = rate;
    }
    CallOverrides(&s.call).apply(
        &mut config.rate_limit,
        &mut config.retry,
        &mut config.call_timeout,
        &mut config.token_timeout,
    );

    tracing::debug!(endpoint = %config.endpoint, region = %s.region_id, "Aliyun ECP client configured");
    let client = AliyunEcpClient::new(config, limiter)?;
    let defaults = AliyunDefaults {
        region_id: s.region_id.clone(),
        image_id: s.image_id.clone(),
        office_site_id: s.office_site_id.clone(),
        vswitch_id: s.vswitch_id.clone(),
        backup_path: s.backup_path.clone(),
    };
    Ok(AliyunProvider::new(Arc::new(client), defaults))
}

fn adb_for(binary: Option<&String>) -> Adb {
    binary.map(Adb::new).unwrap_or_default()
}

fn redroid_config(s: &RedroidSettings) -> Result<RedroidConfig> {
    let mut config = RedroidConfig {
        docker_host: s.docker_host.clone(),
        network: s.network.clone(),
        ..RedroidConfig::default()
    };
    if let Some(image) = &s.image {
        config.image = image.clone();
    }
    if let Some(host) = &s.adb_host {
        config.adb_host = host.clone();
    }
    if let Some((start, end)) = s.port_range {
        config.port_range = PortRange::new(start, end)?;
    }
    if let Some(audio) = s.enable_audio {
        config.enable_audio = audio;
    }
    Ok(config)
}

fn redroid_provider(s: &RedroidSettings) -> Result<RedroidProvider> {
    let config = redroid_config(s)?;
    Ok(RedroidProvider::connect(config, adb_for(s.adb_binary.as_ref()))?)
}

fn physical_provider(s: &PhysicalSettings) -> Result<PhysicalProvider> {
    let devices = s
        .devices
        .iter()
        .map(|d| {
            let mut device = match &d.host {
                Some(host) => PhysicalDevice::network(&d.serial, host, d.port),
                None => PhysicalDevice::usb(&d.serial),
            };
            device.model = d.model.clone();
            device
        })
        .collect();
    let pool = DevicePool::new(devices)?;
    Ok(PhysicalProvider::new(pool, adb_for(s.adb_binary.as_ref())))
}

/// Loop cadences: configured overrides first, then the per-provider defaults
pub fn scheduler_config(config: &FleetConfig, registry: &ProviderRegistry) -> SchedulerConfig {
    let refresh_intervals = registry
        .cloud_types()
        .into_iter()
        .filter_map(|pt| {
            config
                .provider(pt)
                .and_then(ProviderSettings::token_refresh_interval)
                .or_else(|| default_refresh_interval(pt))
                .map(|interval| (pt, interval))
        })
        .collect();

    SchedulerConfig {
        status_interval: config.sync.status_interval,
        refresh_intervals,
    }
}
