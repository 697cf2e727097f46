//! Cycle statistics and the per-provider cycle guard

use chrono::{DateTime, Utc};
use phonefleet_provider::{DeviceStatus, ProviderType};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters for one reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Devices the backend was asked about
    pub checked: usize,
    /// Devices whose record was rewritten
    pub updated: usize,
    pub unchanged: usize,
    /// Candidates without an external id
    pub skipped: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn record(&mut self, outcome: &DeviceOutcome) {
        match outcome {
            DeviceOutcome::Updated => {
                self.checked += 1;
                self.updated += 1;
            }
            DeviceOutcome::Unchanged => {
                self.checked += 1;
                self.unchanged += 1;
            }
            DeviceOutcome::Failed => {
                self.checked += 1;
                self.failed += 1;
            }
        }
    }
}

/// Per-device result inside a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    Updated,
    Unchanged,
    Failed,
}

/// Summary of one cycle for one provider
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub provider: ProviderType,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub stats: SyncStats,
    /// The cycle did not run because another one for this provider was in flight
    pub overlapped: bool,
}

impl SyncReport {
    pub(crate) fn overlapped(provider: ProviderType) -> Self {
        Self {
            provider,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            stats: SyncStats::default(),
            overlapped: true,
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Result of a manual status sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated {
        from: DeviceStatus,
        to: DeviceStatus,
    },
    Unchanged(DeviceStatus),
}

/// Keeps at most one cycle per provider in flight
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    running: Arc<Mutex<HashSet<ProviderType>>>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a cycle for `provider` is already running
    pub fn try_enter(&self, provider: ProviderType) -> Option<CyclePermit> {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider);
        inserted.then(|| CyclePermit {
            running: self.running.clone(),
            provider,
        })
    }

    pub fn is_running(&self, provider: ProviderType) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&provider)
    }
}

/// Released on drop
#[derive(Debug)]
pub struct CyclePermit {
    running: Arc<Mutex<HashSet<ProviderType>>>,
    provider: ProviderType,
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.provider);
    }
}
