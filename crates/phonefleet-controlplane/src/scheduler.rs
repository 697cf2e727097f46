//! Periodic reconciliation loops
//!
//! One loop for status sync across all cloud providers, and one token
//! refresh loop per provider with its own cadence. All loops stop when the
//! cancellation token fires.

use crate::error::{ControlPlaneError, Result};
use crate::status_sync::{DEFAULT_STATUS_INTERVAL, StatusSyncService};
use crate::token_refresh::{TokenRefreshService, default_refresh_interval};
use phonefleet_provider::ProviderType;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub status_interval: Duration,
    /// Token refresh cadence per provider; providers absent here are not refreshed
    pub refresh_intervals: BTreeMap<ProviderType, Duration>,
}

impl SchedulerConfig {
    /// Default cadences for the given providers
    pub fn for_providers(providers: &[ProviderType]) -> Self {
        Self {
            status_interval: DEFAULT_STATUS_INTERVAL,
            refresh_intervals: providers
                .iter()
                .filter_map(|p| default_refresh_interval(*p).map(|d| (*p, d)))
                .collect(),
        }
    }

    /// Every loop needs a non-zero period
    pub fn validate(&self) -> Result<()> {
        if self.status_interval.is_zero() {
            return Err(ControlPlaneError::InvalidSchedule(
                "status interval must be non-zero".into(),
            ));
        }
        if let Some((provider, _)) = self.refresh_intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ControlPlaneError::InvalidSchedule(format!(
                "token refresh interval for {} must be non-zero",
                provider
            )));
        }
        Ok(())
    }
}

pub struct Scheduler {
    status_sync: Arc<StatusSyncService>,
    token_refresh: Arc<TokenRefreshService>,
    config: SchedulerConfig,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        status_sync: Arc<StatusSyncService>,
        token_refresh: Arc<TokenRefreshService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            status_sync,
            token_refresh,
            config,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn all loops; the first cycle of each runs immediately
    ///
    /// Nothing is spawned when a period is zero.
    pub fn start(&mut self) -> Result<()> {
        self.config.validate()?;
        let status_sync = self.status_sync.clone();
        self.tasks.push(spawn_loop(
            "status-sync".to_string(),
            self.config.status_interval,
            self.token.clone(),
            move || {
                let service = status_sync.clone();
                async move {
                    service.sync_all().await;
                }
            },
        ));

        for (&provider_type, &interval) in &self.config.refresh_intervals {
            let token_refresh = self.token_refresh.clone();
            self.tasks.push(spawn_loop(
                format!("token-refresh:{}", provider_type),
                interval,
                self.token.clone(),
                move || {
                    let service = token_refresh.clone();
                    async move {
                        if let Err(e) = service.refresh_provider(provider_type).await {
                            tracing::error!(provider = %provider_type, error = %e, "Token refresh cycle failed");
                        }
                    }
                },
            ));
        }

        tracing::info!(
            status_interval_secs = self.config.status_interval.as_secs(),
            refresh_loops = self.config.refresh_intervals.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Cancel all loops and wait for in-flight cycles to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn spawn_loop<F, Fut>(
    name: String,
    period: Duration,
    token: CancellationToken,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task = %name, "Loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    cycle().await;
                }
            }
        }
    })
}
