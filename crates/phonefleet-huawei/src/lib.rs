//! Huawei Cloud Phone (CPH) provider for PhoneFleet
//!
//! This crate implements the DeviceProvider trait for Huawei Cloud Phone,
//! enabling PhoneFleet to manage cloud phones of a CPH project.
//!
//! # Features
//!
//! - Phone lifecycle (create, restart, stop, delete)
//! - Status mapping from CPH integer codes
//! - Single-shot session tickets for WebRTC access
//! - Input through synchronous cloud ADB commands
//! - APK install and file push/export through OBS
//!
//! # Requirements
//!
//! - A CPH project id and an IAM token (`X-Auth-Token`)
//! - APKs and archives must be uploaded to OBS beforehand
//!
//! # Example
//!
//! ```ignore
//! use phonefleet_huawei::{CphConfig, HuaweiCphClient, HuaweiProvider};
//! use phonefleet_provider::{DeviceProvider, RateLimiter};
//! use std::sync::Arc;
//!
//! let limiter = Arc::new(RateLimiter::new());
//! let config = CphConfig::new(CphConfig::endpoint_for_region("cn-north-4"), "project", "token");
//! let client = HuaweiCphClient::new(config, limiter)?;
//! let provider = HuaweiProvider::new(Arc::new(client));
//!
//! let status = provider.get_status("phone-id").await?;
//! ```

pub mod client;
pub mod error;
pub mod provider;
pub mod types;

pub use client::{CphApi, HuaweiCphClient, RATE_LIMIT_KEY};
pub use error::{HuaweiError, Result, is_transient_code};
pub use provider::HuaweiProvider;
pub use types::{CphConfig, CphPhone, ObsPath, PhoneStatus};
