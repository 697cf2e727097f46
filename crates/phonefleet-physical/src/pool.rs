//! Pre-registered physical device pool

use crate::error::{PhysicalError, Result};
use chrono::{DateTime, Utc};
use phonefleet_provider::AdbEndpoint;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// A device registered in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDevice {
    /// Hardware serial; used as the device id
    pub serial: String,
    /// Network ADB host. `None` for USB-attached devices.
    pub host: Option<String>,
    #[serde(default = "default_adb_port")]
    pub port: u16,
    pub model: Option<String>,
}

fn default_adb_port() -> u16 {
    5555
}

impl PhysicalDevice {
    pub fn usb(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            host: None,
            port: default_adb_port(),
            model: None,
        }
    }

    pub fn network(serial: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            serial: serial.into(),
            host: Some(host.into()),
            port,
            model: None,
        }
    }

    pub fn is_network(&self) -> bool {
        self.host.is_some()
    }

    /// Serial that adb addresses the device by
    pub fn adb_serial(&self) -> String {
        self.endpoint().serial
    }

    pub fn endpoint(&self) -> AdbEndpoint {
        match &self.host {
            Some(host) => AdbEndpoint::new(host, self.port),
            None => AdbEndpoint {
                host: String::new(),
                port: 0,
                serial: self.serial.clone(),
            },
        }
    }
}

/// Who holds a device
#[derive(Debug, Clone)]
pub struct Allocation {
    pub name: String,
    pub user_id: Option<String>,
    pub allocated_at: DateTime<Utc>,
}

/// Fixed set of physical devices handed out one owner at a time
#[derive(Debug)]
pub struct DevicePool {
    devices: Vec<PhysicalDevice>,
    allocations: Mutex<HashMap<String, Allocation>>,
}

impl DevicePool {
    pub fn new(devices: Vec<PhysicalDevice>) -> Result<Self> {
        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.serial.as_str()) {
                return Err(PhysicalError::DuplicateSerial(device.serial.clone()));
            }
        }
        Ok(Self {
            devices,
            allocations: Mutex::new(HashMap::new()),
        })
    }

    pub fn devices(&self) -> &[PhysicalDevice] {
        &self.devices
    }

    pub fn get(&self, serial: &str) -> Result<&PhysicalDevice> {
        self.devices
            .iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| PhysicalError::DeviceNotRegistered(serial.to_string()))
    }

    /// Allocate `requested`, or the first free device in registration order
    pub fn allocate(
        &self,
        requested: Option<&str>,
        name: &str,
        user_id: Option<&str>,
    ) -> Result<PhysicalDevice> {
        let mut allocations = self
            .allocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let device = match requested {
            Some(serial) => {
                let device = self.get(serial)?;
                if allocations.contains_key(serial) {
                    return Err(PhysicalError::DeviceInUse(serial.to_string()));
                }
                device
            }
            None => self
                .devices
                .iter()
                .find(|d| !allocations.contains_key(&d.serial))
                .ok_or(PhysicalError::PoolExhausted {
                    total: self.devices.len(),
                })?,
        };

        allocations.insert(
            device.serial.clone(),
            Allocation {
                name: name.to_string(),
                user_id: user_id.map(|s| s.to_string()),
                allocated_at: Utc::now(),
            },
        );
        Ok(device.clone())
    }

    /// 割り当てを解除する。未割り当てなら false
    pub fn release(&self, serial: &str) -> bool {
        self.allocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(serial)
            .is_some()
    }

    pub fn allocation(&self, serial: &str) -> Option<Allocation> {
        self.allocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(serial)
            .cloned()
    }

    pub fn is_allocated(&self, serial: &str) -> bool {
        self.allocation(serial).is_some()
    }

    pub fn available(&self) -> usize {
        let allocations = self
            .allocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.devices
            .iter()
            .filter(|d| !allocations.contains_key(&d.serial))
            .count()
    }
}
