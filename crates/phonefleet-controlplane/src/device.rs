//! Persisted device record

use chrono::{DateTime, Utc};
use phonefleet_provider::{ConnectionInfo, DeviceStatus, ProviderDevice, ProviderType};
use serde::{Deserialize, Serialize};

/// A device as the control plane stores it
///
/// Reconciliation only ever rewrites `status`, `connection_info` and
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub user_id: Option<String>,
    pub provider_type: ProviderType,
    /// Backend id (instance id, container name, serial)
    pub external_id: Option<String>,
    pub status: DeviceStatus,
    pub connection_info: Option<ConnectionInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            user_id: None,
            provider_type,
            external_id: None,
            status: DeviceStatus::Creating,
            connection_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a device an adapter just created
    pub fn from_provider(
        provider_type: ProviderType,
        created: ProviderDevice,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: created.name,
            user_id,
            provider_type,
            external_id: Some(created.id),
            status: created.status,
            connection_info: Some(created.connection_info),
            created_at: created.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_connection_info(mut self, info: ConnectionInfo) -> Self {
        self.connection_info = Some(info);
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set `status`, touching `updated_at` only when it differs
    pub fn apply_status(&mut self, status: DeviceStatus) -> FieldUpdate<DeviceStatus> {
        if self.status == status {
            return FieldUpdate::Unchanged(status);
        }
        let previous = std::mem::replace(&mut self.status, status);
        self.touch();
        FieldUpdate::Updated {
            previous,
            current: status,
        }
    }

    /// Combine fresh connection info with the stored one
    ///
    /// Uses [`ConnectionInfo::refreshed_with`], so Aliyun keeps channels the
    /// fresh answer lacks.
    pub fn apply_connection_info(
        &mut self,
        fresh: ConnectionInfo,
    ) -> FieldUpdate<ConnectionInfo, Option<ConnectionInfo>> {
        let combined = match self.connection_info.clone() {
            Some(stored) => stored.refreshed_with(fresh),
            None => fresh,
        };
        if self.connection_info.as_ref() == Some(&combined) {
            return FieldUpdate::Unchanged(combined);
        }
        let previous = self.connection_info.replace(combined.clone());
        self.touch();
        FieldUpdate::Updated {
            previous,
            current: combined,
        }
    }
}

/// Result of rewriting a single field of a stored record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T, P = T> {
    /// No record with that id
    Missing,
    Unchanged(T),
    Updated { previous: P, current: T },
}

impl<T, P> FieldUpdate<T, P> {
    pub fn is_updated(&self) -> bool {
        matches!(self, FieldUpdate::Updated { .. })
    }
}

/// Query over stored devices; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub provider_type: Option<ProviderType>,
    pub statuses: Vec<DeviceStatus>,
}

impl DeviceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider_type: ProviderType) -> Self {
        self.provider_type = Some(provider_type);
        self
    }

    pub fn status_in(mut self, statuses: impl IntoIterator<Item = DeviceStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn matches(&self, device: &Device) -> bool {
        self.provider_type.is_none_or(|t| t == device.provider_type)
            && (self.statuses.is_empty() || self.statuses.contains(&device.status))
    }
}
