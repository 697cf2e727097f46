//! PhoneFleet device provider layer
//!
//! This crate provides the uniform device lifecycle contract for PhoneFleet,
//! together with the resilience primitives every outbound vendor call goes
//! through.
//!
//! # Supported Providers
//!
//! - **Redroid**: Android in Docker containers (phonefleet-redroid)
//! - **Huawei Cloud Phone**: CPH REST API (phonefleet-huawei)
//! - **Aliyun Elastic Cloud Phone**: ECP REST API (phonefleet-aliyun)
//! - **Physical**: pre-registered devices over ADB (phonefleet-physical)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │             phonefleet-controlplane              │
//! │        (status sync / token refresh loops)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               phonefleet-provider                │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait DeviceProvider + capabilities      │   │
//! │  │  ProviderRegistry                         │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ RateLimiter  │  │ RetryPolicy  │ ─► CallGuard│
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬──────────┬──────────┬──────────┬────────┘
//!         │          │          │          │
//! ┌───────▼──┐ ┌─────▼────┐ ┌───▼─────┐ ┌──▼───────┐
//! │ redroid  │ │  huawei  │ │ aliyun  │ │ physical │
//! └──────────┘ └──────────┘ └─────────┘ └──────────┘
//! ```

pub mod adb;
pub mod error;
pub mod guard;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod types;
pub mod vendor;

// Re-exports
pub use adb::{Adb, AdbControl, SerialResolver};
pub use error::{ErrorKind, ProviderError, Result};
pub use guard::CallGuard;
pub use provider::{
    AppManagement, DeviceProvider, FileTransferControl, InputControl, MediaCapture,
    SnapshotManagement,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use types::{
    AdbEndpoint, AdbServlet, AliyunConnection, AppInstallOptions, CaptureFormat, ConnectionInfo,
    DeviceCapabilities, DeviceCreateConfig, DeviceProperties, DeviceSnapshot, DeviceStatus,
    FileTransfer, HuaweiConnection, KeyEvent, ProviderDevice, ProviderType, Resolution,
    SwipeEvent, TextInput, TouchEvent, WebRtcChannel,
};
pub use vendor::VendorResult;
