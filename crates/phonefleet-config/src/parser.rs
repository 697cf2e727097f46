//! KDL → FleetConfig
//!
//! ```kdl
//! store "./data/devices.json"
//! sync {
//!     status-interval 300
//!     concurrency 8
//! }
//! provider "aliyun_ecp" {
//!     region "cn-shanghai"
//!     access-key-id "env:ALIYUN_ACCESS_KEY_ID"
//!     token-refresh-interval 10
//!     rate-limit capacity=20 refill-rate=10
//! }
//! ```
//!
//! Intervals are in seconds, timeouts and retry delays in milliseconds.

use crate::error::{ConfigError, Result};
use crate::model::{
    AliyunSettings, CallSettings, FleetConfig, HuaweiSettings, PhysicalDeviceSettings,
    PhysicalSettings, ProviderSettings, RedroidSettings, SyncSettings,
};
use kdl::{KdlDocument, KdlNode, KdlValue};
use phonefleet_provider::{ProviderType, RateLimitConfig, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "env:";

/// Parse a configuration document
pub fn parse_config(content: &str) -> Result<FleetConfig> {
    let doc: KdlDocument = content.parse()?;
    let mut config = FleetConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "store" => config.store = PathBuf::from(required_string(node)?),
            "sync" => config.sync = parse_sync(node)?,
            "provider" => {
                let provider = parse_provider(node)?;
                if config.provider(provider.provider_type()).is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "provider {} is configured twice",
                        provider.provider_type()
                    )));
                }
                config.providers.push(provider);
            }
            other => {
                tracing::warn!(node = other, "Unknown top-level config node, ignoring");
            }
        }
    }

    Ok(config)
}

/// `env:VAR` → value of `VAR`; anything else is returned as is
pub fn resolve_secret(raw: &str) -> Result<String> {
    match raw.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingEnv {
            var: var.to_string(),
        }),
        None => Ok(raw.to_string()),
    }
}

fn parse_sync(node: &KdlNode) -> Result<SyncSettings> {
    let mut sync = SyncSettings::default();
    for child in children(node) {
        match child.name().value() {
            "status-interval" => {
                sync.status_interval = Duration::from_secs(positive_int(child)?)
            }
            "concurrency" => sync.concurrency = positive_int(child)? as usize,
            other => tracing::warn!(node = other, "Unknown sync setting, ignoring"),
        }
    }
    Ok(sync)
}

fn parse_provider(node: &KdlNode) -> Result<ProviderSettings> {
    let name = required_string(node)?;
    let provider_type: ProviderType = name
        .parse()
        .map_err(|_| ConfigError::UnknownProvider(name.clone()))?;

    match provider_type {
        ProviderType::HuaweiCph => parse_huawei(node).map(ProviderSettings::HuaweiCph),
        ProviderType::AliyunEcp => parse_aliyun(node).map(ProviderSettings::AliyunEcp),
        ProviderType::Redroid => parse_redroid(node).map(ProviderSettings::Redroid),
        ProviderType::Physical => parse_physical(node).map(ProviderSettings::Physical),
    }
}

/// Shared resilience settings; returns `false` for nodes it does not know
fn parse_call_setting(call: &mut CallSettings, child: &KdlNode) -> Result<bool> {
    match child.name().value() {
        "rate-limit" => call.rate_limit = Some(parse_rate_limit(child)?),
        "retry" => call.retry = Some(parse_retry(child)?),
        "call-timeout" => call.call_timeout = Some(Duration::from_millis(positive_int(child)?)),
        "token-timeout" => call.token_timeout = Some(Duration::from_millis(positive_int(child)?)),
        "token-refresh-interval" => {
            call.token_refresh_interval = Some(Duration::from_secs(positive_int(child)?))
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn parse_huawei(node: &KdlNode) -> Result<HuaweiSettings> {
    let mut call = CallSettings::default();
    let mut endpoint = None;
    let mut region = None;
    let mut project_id = None;
    let mut auth_token = None;
    let mut default_server_id = None;
    let mut default_image_id = None;

    for child in children(node) {
        if parse_call_setting(&mut call, child)? {
            continue;
        }
        match child.name().value() {
            "endpoint" => endpoint = Some(required_string(child)?),
            "region" => region = Some(required_string(child)?),
            "project-id" => project_id = Some(required_string(child)?),
            "auth-token" => auth_token = Some(resolve_secret(&required_string(child)?)?),
            "server-id" => default_server_id = Some(required_string(child)?),
            "image-id" => default_image_id = Some(required_string(child)?),
            other => tracing::warn!(node = other, "Unknown huawei_cph setting, ignoring"),
        }
    }

    if endpoint.is_none() && region.is_none() {
        return Err(ConfigError::Invalid(
            "huawei_cph requires endpoint or region".into(),
        ));
    }
    Ok(HuaweiSettings {
        endpoint,
        region,
        project_id: project_id.ok_or_else(|| missing("huawei_cph", "project-id"))?,
        auth_token: auth_token.ok_or_else(|| missing("huawei_cph", "auth-token"))?,
        default_server_id,
        default_image_id,
        call,
    })
}

fn parse_aliyun(node: &KdlNode) -> Result<AliyunSettings> {
    let mut call = CallSettings::default();
    let mut endpoint = None;
    let mut region_id = None;
    let mut access_key_id = None;
    let mut security_token = None;
    let mut image_id = None;
    let mut office_site_id = None;
    let mut vswitch_id = None;
    let mut backup_path = None;
    let mut ticket_rate_limit = None;

    for child in children(node) {
        if parse_call_setting(&mut call, child)? {
            continue;
        }
        match child.name().value() {
            "endpoint" => endpoint = Some(required_string(child)?),
            "region" => region_id = Some(required_string(child)?),
            "access-key-id" => access_key_id = Some(resolve_secret(&required_string(child)?)?),
            "security-token" => security_token = Some(resolve_secret(&required_string(child)?)?),
            "image-id" => image_id = Some(required_string(child)?),
            "office-site-id" => office_site_id = Some(required_string(child)?),
            "vswitch-id" => vswitch_id = Some(required_string(child)?),
            "backup-path" => backup_path = Some(required_string(child)?),
            "ticket-rate-limit" => ticket_rate_limit = Some(parse_rate_limit(child)?),
            other => tracing::warn!(node = other, "Unknown aliyun_ecp setting, ignoring"),
        }
    }

    Ok(AliyunSettings {
        endpoint,
        region_id: region_id.ok_or_else(|| missing("aliyun_ecp", "region"))?,
        access_key_id: access_key_id.ok_or_else(|| missing("aliyun_ecp", "access-key-id"))?,
        security_token,
        image_id,
        office_site_id,
        vswitch_id,
        backup_path,
        ticket_rate_limit,
        call,
    })
}

fn parse_redroid(node: &KdlNode) -> Result<RedroidSettings> {
    let mut settings = RedroidSettings::default();
    for child in children(node) {
        match child.name().value() {
            "docker-host" => settings.docker_host = Some(required_string(child)?),
            "image" => settings.image = Some(required_string(child)?),
            "adb-host" => settings.adb_host = Some(required_string(child)?),
            "network" => settings.network = Some(required_string(child)?),
            "adb" => settings.adb_binary = Some(required_string(child)?),
            "enable-audio" => {
                settings.enable_audio = Some(arg(child).and_then(|v| v.as_bool()).ok_or_else(
                    || ConfigError::Invalid("enable-audio expects #true or #false".into()),
                )?)
            }
            "port-range" => {
                let start = port(child, "start")?;
                let end = port(child, "end")?;
                if start > end {
                    return Err(ConfigError::Invalid(format!(
                        "port-range start {} is above end {}",
                        start, end
                    )));
                }
                settings.port_range = Some((start, end));
            }
            other => tracing::warn!(node = other, "Unknown redroid setting, ignoring"),
        }
    }
    Ok(settings)
}

fn parse_physical(node: &KdlNode) -> Result<PhysicalSettings> {
    let mut settings = PhysicalSettings::default();
    for child in children(node) {
        match child.name().value() {
            "device" => settings.devices.push(PhysicalDeviceSettings {
                serial: required_string(child)?,
                host: child.get("host").and_then(|v| v.as_string()).map(|s| s.to_string()),
                port: match child.get("port") {
                    Some(_) => port(child, "port")?,
                    None => 5555,
                },
                model: child.get("model").and_then(|v| v.as_string()).map(|s| s.to_string()),
            }),
            "adb" => settings.adb_binary = Some(required_string(child)?),
            other => tracing::warn!(node = other, "Unknown physical setting, ignoring"),
        }
    }
    Ok(settings)
}

/// `rate-limit capacity=20 refill-rate=10`
fn parse_rate_limit(node: &KdlNode) -> Result<RateLimitConfig> {
    let capacity = prop_int(node, "capacity")?.ok_or_else(|| missing_prop(node, "capacity"))?;
    let refill_rate =
        prop_int(node, "refill-rate")?.ok_or_else(|| missing_prop(node, "refill-rate"))?;
    if capacity == 0 || refill_rate == 0 {
        return Err(ConfigError::Invalid(
            "rate-limit capacity and refill-rate must be positive".into(),
        ));
    }
    Ok(RateLimitConfig::new(
        to_u32(capacity, "capacity")?,
        to_u32(refill_rate, "refill-rate")?,
    ))
}

/// `retry max-attempts=3 base-delay=1000 max-delay=30000 backoff=2.0 jitter=0.1`
///
/// Starts from the vendor policy, so only transient failures retry.
fn parse_retry(node: &KdlNode) -> Result<RetryPolicy> {
    let mut policy = RetryPolicy::vendor();
    if let Some(attempts) = prop_int(node, "max-attempts")? {
        policy = policy.with_max_attempts(to_u32(attempts, "max-attempts")?);
    }
    if let Some(ms) = prop_int(node, "base-delay")? {
        policy.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = prop_int(node, "max-delay")? {
        policy.max_delay = Duration::from_millis(ms);
    }
    if let Some(backoff) = prop_float(node, "backoff")? {
        if backoff < 1.0 {
            return Err(ConfigError::Invalid("retry backoff must be >= 1.0".into()));
        }
        policy.backoff_base = backoff;
    }
    if let Some(jitter) = prop_float(node, "jitter")? {
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid("retry jitter must be within 0..1".into()));
        }
        policy.jitter_factor = jitter;
    }
    Ok(policy)
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

/// First positional argument
fn arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn required_string(node: &KdlNode) -> Result<String> {
    arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ConfigError::Invalid(format!("{} expects a string argument", node.name().value()))
        })
}

fn required_int(node: &KdlNode) -> Result<u64> {
    arg(node)
        .and_then(|v| v.as_integer())
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{} expects a non-negative integer",
                node.name().value()
            ))
        })
}

/// Intervals, timeouts and counts where zero would stall or panic
fn positive_int(node: &KdlNode) -> Result<u64> {
    match required_int(node)? {
        0 => Err(ConfigError::Invalid(format!(
            "{} must be positive",
            node.name().value()
        ))),
        value => Ok(value),
    }
}

fn prop_int(node: &KdlNode, key: &str) -> Result<Option<u64>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{} {} expects a non-negative integer",
                    node.name().value(),
                    key
                ))
            }),
    }
}

fn prop_float(node: &KdlNode, key: &str) -> Result<Option<f64>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .or_else(|| value.as_integer().map(|v| v as f64))
            .map(Some)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("{} {} expects a number", node.name().value(), key))
            }),
    }
}

fn port(node: &KdlNode, key: &str) -> Result<u16> {
    let value = prop_int(node, key)?.ok_or_else(|| missing_prop(node, key))?;
    u16::try_from(value)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| ConfigError::Invalid(format!("{} is not a valid port: {}", key, value)))
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| ConfigError::Invalid(format!("{} is too large", what)))
}

fn missing(provider: &str, field: &str) -> ConfigError {
    ConfigError::Invalid(format!("{} requires {}", provider, field))
}

fn missing_prop(node: &KdlNode, key: &str) -> ConfigError {
    ConfigError::Invalid(format!("{} requires {}=", node.name().value(), key))
}
