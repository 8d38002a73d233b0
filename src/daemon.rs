//! Long-running companion process: management API, watchdog, scheduled
//! tasks and the lease watcher

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::Config;
use crate::error::RotationError;
use crate::lease::{CertificateLease, LeasePaths};
use crate::rotation::RecoveryOutcome;
use crate::schedule::Scheduler;
use crate::state::AppState;
use crate::watcher::LeaseWatcher;

/// Periodic watchdog: restores services when a renewal cycle stalls and
/// warns about leases close to expiry
pub struct Watchdog {
    state: AppState,
    check_interval: Duration,
    renewal_days_before_expiry: i64,
    lease_paths: LeasePaths,
}

impl Watchdog {
    pub fn new(state: AppState, config: &Config) -> Self {
        Self {
            state,
            check_interval: Duration::from_secs(config.watchdog.check_interval_secs),
            renewal_days_before_expiry: config.lease.renewal_days_before_expiry,
            lease_paths: config.lease.paths(),
        }
    }

    pub async fn start(self) {
        info!(
            "Starting watchdog (check interval: {}s)",
            self.check_interval.as_secs()
        );

        let mut timer = interval(self.check_interval);
        loop {
            timer.tick().await;
            self.check().await;
        }
    }

    /// One watchdog pass
    pub async fn check(&self) {
        match self.state.orchestrator.recover(false).await {
            Ok(outcome) => {
                if let RecoveryOutcome::ReloadPending { since, last_error } = &outcome {
                    warn!(
                        "Service reload pending since {}: {}",
                        since,
                        last_error.as_deref().unwrap_or("unknown error")
                    );
                } else {
                    debug!("Watchdog check: {:?}", outcome);
                }
                self.state.metrics.record_recovery(&outcome);
            }
            Err(e) => {
                error!("Watchdog recovery failed: {}", e);
                self.state.metrics.record_hook("recover", "error");
                if let RotationError::ReloadFailed { failures } = &e {
                    for failure in failures {
                        self.state.metrics.record_reload_failure(&failure.service);
                    }
                }
            }
        }

        match self.state.orchestrator.store().load().await {
            Ok(record) => {
                self.state.metrics.set_state(record.state);
                self.state.metrics.sync_hook_runs(&record.hook_runs);
            }
            Err(e) => error!("Failed to load rotation record: {:#}", e),
        }

        match CertificateLease::load(&self.lease_paths).await {
            Ok(lease) => {
                self.state.metrics.set_lease(&lease);
                let now = Utc::now();
                if lease.is_expired(now) {
                    error!("Lease expired at {}", lease.expires_at);
                } else if lease.needs_renewal(now, self.renewal_days_before_expiry) {
                    warn!(
                        "Lease expires in {} days and has not been renewed yet",
                        lease.days_until_expiry(now)
                    );
                }
            }
            Err(e) => warn!("No readable lease on disk: {:#}", e),
        }
    }
}

/// Run every daemon component until Ctrl-C
pub async fn run(config: Config, state: AppState) -> Result<()> {
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let (addr, app) = api::server::create_api_server(&config.api.listen_addr, state.clone())?;
    handles.push(tokio::spawn(async move {
        if let Err(e) = api::server::run_api_server(addr, app).await {
            error!("API server error: {:#}", e);
        }
    }));

    let watchdog = Watchdog::new(state.clone(), &config);
    handles.push(tokio::spawn(watchdog.start()));

    let scheduler = Scheduler::from_config(&config.tasks, Some(state.metrics.clone()));
    if scheduler.is_empty() {
        info!("No scheduled tasks configured");
    }
    handles.extend(scheduler.start());

    let watcher = Arc::new(LeaseWatcher::new(config.lease.paths(), state.metrics.clone(), 2));
    match watcher.start() {
        Ok(handle) => handles.push(handle),
        Err(e) => warn!("Lease watcher disabled: {:#}", e),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
