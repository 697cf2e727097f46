//! Aliyun Elastic Cloud Phone (ECP) provider for PhoneFleet
//!
//! Implements the DeviceProvider trait on top of the ECP OpenAPI.
//!
//! # Features
//!
//! - Instance lifecycle through single-instance instance groups
//! - Short-lived (30 s) connection tickets for the WebRTC channel
//! - ADB servlet address as a second, independently refreshed channel
//! - Shell, file and app operations through asynchronous ECP tasks
//! - OSS backups exposed as snapshots
//!
//! # Example
//!
//! ```ignore
//! use phonefleet_aliyun::{AliyunDefaults, AliyunEcpClient, AliyunProvider, EcpConfig};
//! use phonefleet_provider::{DeviceProvider, RateLimiter};
//! use std::sync::Arc;
//!
//! let limiter = Arc::new(RateLimiter::new());
//! let config = EcpConfig::new(EcpConfig::endpoint_for_region("cn-shanghai"), "cn-shanghai", "ak");
//! let client = AliyunEcpClient::new(config, limiter)?;
//! let provider = AliyunProvider::new(Arc::new(client), AliyunDefaults::default());
//!
//! let info = provider.get_connection_info("acp-xxxx").await?;
//! ```

pub mod client;
pub mod error;
pub mod provider;
pub mod types;

pub use client::{AliyunEcpClient, EcpApi, RATE_LIMIT_KEY, TICKET_RATE_LIMIT_KEY};
pub use error::{AliyunError, Result, is_transient_code};
pub use provider::{AliyunDefaults, AliyunProvider};
pub use types::{EcpConfig, EcpInstance, InstanceStatus, OssPath, TICKET_TTL};
