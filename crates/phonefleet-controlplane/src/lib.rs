//! PhoneFleet control plane
//!
//! Keeps the local device store in line with what each cloud vendor
//! reports: periodic status reconciliation, credential refresh for running
//! devices, and the device stores they write to.

pub mod device;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod stats;
pub mod status_sync;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod token_refresh;

pub use device::{Device, DeviceFilter, FieldUpdate};
pub use error::{ControlPlaneError, Result};
pub use repository::{DeviceRepository, InMemoryDeviceRepository};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stats::{CycleGuard, SyncOutcome, SyncReport, SyncStats};
pub use status_sync::{DEFAULT_CONCURRENCY, DEFAULT_STATUS_INTERVAL, StatusSyncService};
pub use store::FileDeviceRepository;
pub use token_refresh::{TokenRefreshService, default_refresh_interval};
