//! Physical device pool provider for PhoneFleet
//!
//! Real handsets (USB or network ADB) are registered up front. `create`
//! hands one out, `destroy` returns it to the pool, and start/stop map to
//! `adb connect` / `adb disconnect`.

pub mod error;
pub mod pool;
pub mod provider;

pub use error::{PhysicalError, Result};
pub use pool::{Allocation, DevicePool, PhysicalDevice};
pub use provider::{PhysicalProvider, map_adb_state};
