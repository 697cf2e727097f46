//! Redroid (Android in Docker) provider for PhoneFleet
//!
//! Each device is a privileged `redroid/redroid` container whose ADB port is
//! bound to a host port from a configured range. The container name is the
//! device id.
//!
//! # Features
//!
//! - Container lifecycle through the Docker API (bollard)
//! - Host port allocation with label-based discovery of bound ports
//! - ADB readiness wait with exponential backoff after start
//! - Input, file transfer, app install and screen capture over ADB
//!
//! # Example
//!
//! ```ignore
//! use phonefleet_provider::{Adb, DeviceCreateConfig, DeviceProvider};
//! use phonefleet_redroid::{RedroidConfig, RedroidProvider};
//!
//! let provider = RedroidProvider::connect(RedroidConfig::default(), Adb::default())?;
//! let device = provider.create(&DeviceCreateConfig::new("emulator-1")).await?;
//! provider.start(&device.id).await?;
//! ```

pub mod container;
pub mod error;
pub mod port;
pub mod provider;
pub mod waiter;

pub use container::RedroidConfig;
pub use error::{RedroidError, Result};
pub use port::{PortAllocator, PortRange};
pub use provider::{RedroidProvider, connect_docker};
pub use waiter::wait_for_adb;
