//! Pre/post renewal hooks and the watchdog recovery step

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::store::{Outcome, RotationRecord, StateStore};
use super::{RenewalEvent, RenewalState};
use crate::config::{LeaseConfig, ServicesConfig};
use crate::error::{ReloadFailure, RotationError};
use crate::lease::{CertificateLease, LeaseStatus};
use crate::port::PortProbe;
use crate::supervisor::ServiceSupervisor;

/// What the pre-hook did
#[derive(Debug, Clone, Serialize)]
pub struct PreHookReport {
    pub proxy: String,
    pub port: SocketAddr,
    pub previous_fingerprint: Option<String>,
}

/// What a reload (post-hook or watchdog) did
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub outcome: Outcome,
    /// Lease on disk when the reload started
    pub fingerprint: Option<String>,
    pub restarted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// No cycle is stalled
    Healthy,
    /// A cycle is in progress but has not exceeded the outage limit
    Waiting { state: RenewalState, remaining_secs: i64 },
    /// Services were restarted
    Restored(ReloadReport),
    /// A reload already failed and was reported; only a forced recovery or
    /// the next post-hook retries it
    ReloadPending {
        since: DateTime<Utc>,
        last_error: Option<String>,
    },
}

const PRE_HOOK: &str = "pre_hook";
const POST_HOOK: &str = "post_hook";

/// Persisted record plus the lease currently on disk
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    pub record: RotationRecord,
    pub lease: Option<LeaseStatus>,
    pub lease_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadTrigger {
    PostHook,
    Watchdog,
}

/// Drives the renewal state machine against the Service Supervisor
pub struct RenewalOrchestrator {
    supervisor: Arc<dyn ServiceSupervisor>,
    services: ServicesConfig,
    lease: LeaseConfig,
    probe: PortProbe,
    store: StateStore,
    max_outage_secs: i64,
}

impl RenewalOrchestrator {
    pub fn new(
        supervisor: Arc<dyn ServiceSupervisor>,
        services: ServicesConfig,
        lease: LeaseConfig,
        probe: PortProbe,
        store: StateStore,
        max_outage_secs: u64,
    ) -> Self {
        Self {
            supervisor,
            services,
            lease,
            probe,
            store,
            max_outage_secs: i64::try_from(max_outage_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Pre-renewal hook: stop the proxy and wait for the challenge port
    ///
    /// Returns only once the port is free. On failure the proxy is started
    /// again and the cycle is aborted.
    pub async fn pre_renewal(&self) -> Result<PreHookReport, RotationError> {
        let _lock = self.store.lock().await?;
        let now = Utc::now();
        let mut record = self.store.load().await?;
        let was_in_cycle = record.state.in_cycle();

        record.apply(RenewalEvent::PreHookInvoked, now)?;
        if !was_in_cycle {
            record.cycle_started_at = Some(now);
            record.previous_fingerprint = CertificateLease::current_fingerprint(&self.lease.paths()).await;
        }
        self.store.save(&record).await?;

        info!(
            "Pre-renewal: stopping {} via {} to free {}",
            self.services.proxy,
            self.supervisor.supervisor_name(),
            self.probe.addr()
        );

        match self.release_port().await {
            Ok(()) => {
                record.apply(RenewalEvent::PortReleased, Utc::now())?;
                record.last_outcome = Some(Outcome::PortReleased);
                record.last_error = None;
                record.count_run(PRE_HOOK, Outcome::PortReleased);
                self.store.save(&record).await?;

                info!("Challenge port {} released", self.probe.addr());
                Ok(PreHookReport {
                    proxy: self.services.proxy.clone(),
                    port: self.probe.addr(),
                    previous_fingerprint: record.previous_fingerprint.clone(),
                })
            }
            Err(e) => {
                let err = RotationError::PortUnavailable {
                    service: self.services.proxy.clone(),
                    addr: self.probe.addr().to_string(),
                    reason: format!("{:#}", e),
                };
                error!("Pre-renewal failed, aborting cycle: {}", err);

                if let Err(restore) = self.supervisor.start(&self.services.proxy).await {
                    error!("Failed to start {} again after aborted cycle: {:#}", self.services.proxy, restore);
                }

                record.apply(RenewalEvent::PortUnavailable, Utc::now())?;
                record.cycle_started_at = None;
                record.previous_fingerprint = None;
                record.last_outcome = Some(Outcome::PortUnavailable);
                record.last_error = Some(err.to_string());
                record.count_run(PRE_HOOK, Outcome::PortUnavailable);
                self.store.save(&record).await?;

                Err(err)
            }
        }
    }

    /// Post-renewal hook: restart proxy and storage on whatever lease is on disk
    pub async fn post_renewal(&self) -> Result<ReloadReport, RotationError> {
        let _lock = self.store.lock().await?;
        let mut record = self.store.load().await?;
        self.reload(&mut record, ReloadTrigger::PostHook).await
    }

    /// Watchdog step: restore services when a cycle has stalled
    ///
    /// Stalled means stuck in the challenge window, or a reload that was
    /// interrupted before it finished. A reload that completed with failures
    /// is left alone unless `force` is set, which also ignores the outage
    /// limit (manual operator restore).
    pub async fn recover(&self, force: bool) -> Result<RecoveryOutcome, RotationError> {
        let _lock = self.store.lock().await?;
        let now = Utc::now();
        let mut record = self.store.load().await?;

        match record.state {
            state if state.in_cycle() => {}
            RenewalState::ServicesReloading
                if force || record.last_outcome != Some(Outcome::ReloadFailed) => {}
            RenewalState::ServicesReloading => {
                return Ok(RecoveryOutcome::ReloadPending {
                    since: record.entered_at,
                    last_error: record.last_error.clone(),
                });
            }
            _ => return Ok(RecoveryOutcome::Healthy),
        }

        let age = record.age_secs(now);
        if !force && age < self.max_outage_secs {
            return Ok(RecoveryOutcome::Waiting {
                state: record.state,
                remaining_secs: self.max_outage_secs - age,
            });
        }

        warn!(
            "Renewal cycle stalled in {} for {}s, restoring services",
            record.state, age
        );
        let report = self.reload(&mut record, ReloadTrigger::Watchdog).await?;
        Ok(RecoveryOutcome::Restored(report))
    }

    /// Persisted record plus a fresh read of the lease
    pub async fn status(&self) -> Result<RotationStatus, RotationError> {
        let record = self.store.load().await?;
        let (lease, lease_error) = match CertificateLease::load(&self.lease.paths()).await {
            Ok(lease) => (
                Some(lease.status(Utc::now(), self.lease.renewal_days_before_expiry)),
                None,
            ),
            Err(e) => (None, Some(format!("{:#}", e))),
        };
        Ok(RotationStatus { record, lease, lease_error })
    }

    async fn release_port(&self) -> Result<()> {
        self.supervisor.stop(&self.services.proxy).await?;
        self.probe.wait_until_free().await
    }

    async fn reload(
        &self,
        record: &mut RotationRecord,
        trigger: ReloadTrigger,
    ) -> Result<ReloadReport, RotationError> {
        let now = Utc::now();
        let lease = self.read_lease(now).await;
        let fingerprint = lease.map(|l| l.fingerprint);

        let outcome = match record.state {
            state if state.in_cycle() => {
                let replaced = fingerprint.is_some() && fingerprint != record.previous_fingerprint;
                if replaced {
                    record.apply(RenewalEvent::LeaseIssued, now)?;
                    Outcome::Renewed
                } else {
                    let event = match trigger {
                        ReloadTrigger::PostHook => RenewalEvent::IssuanceFailed,
                        ReloadTrigger::Watchdog => RenewalEvent::WatchdogExpired,
                    };
                    record.apply(event, now)?;
                    warn!("Lease was not replaced, restoring services on the previous lease");
                    Outcome::RestoredPrevious
                }
            }
            RenewalState::Issued => Outcome::Renewed,
            RenewalState::Failed => Outcome::RestoredPrevious,
            _ => Outcome::Reloaded,
        };

        record.apply(RenewalEvent::ReloadRequested, now)?;
        // Age of a pending reload counts from the latest attempt
        record.entered_at = now;
        self.store.save(record).await?;

        let mut restarted = Vec::new();
        let mut failures = Vec::new();

        // Independent targets: a proxy failure must not skip the storage restart
        for service in [&self.services.proxy, &self.services.storage] {
            match self.restart_confirmed(service).await {
                Ok(()) => {
                    info!("{} restarted on the current lease", service);
                    restarted.push(service.clone());
                }
                Err(e) => {
                    error!("Failed to restart {}: {:#}", service, e);
                    failures.push(ReloadFailure {
                        service: service.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        let done = Utc::now();
        record.cycle_started_at = None;
        record.previous_fingerprint = None;

        if failures.is_empty() {
            record.apply(RenewalEvent::ServicesReloaded, done)?;
            record.bound_fingerprint = fingerprint.clone();
            record.last_outcome = Some(outcome);
            record.last_error = None;
            if trigger == ReloadTrigger::PostHook {
                record.count_run(POST_HOOK, outcome);
            }
            self.store.save(record).await?;

            Ok(ReloadReport {
                outcome,
                fingerprint,
                restarted,
            })
        } else {
            let err = RotationError::ReloadFailed { failures };
            record.apply(RenewalEvent::ReloadFailed, done)?;
            record.last_outcome = Some(Outcome::ReloadFailed);
            record.last_error = Some(err.to_string());
            if trigger == ReloadTrigger::PostHook {
                record.count_run(POST_HOOK, Outcome::ReloadFailed);
            }
            self.store.save(record).await?;

            Err(err)
        }
    }

    async fn restart_confirmed(&self, service: &str) -> Result<()> {
        self.supervisor.restart(service).await?;
        if !self.supervisor.is_running(service).await? {
            anyhow::bail!("{} is not running after restart", service);
        }
        Ok(())
    }

    async fn read_lease(&self, now: DateTime<Utc>) -> Option<CertificateLease> {
        let lease = match CertificateLease::load(&self.lease.paths()).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("No readable lease on disk: {:#}", e);
                return None;
            }
        };

        if !lease.covers(&self.lease.domain) {
            warn!(
                "Lease does not cover {} (domains: {:?})",
                self.lease.domain, lease.domains
            );
        }
        if lease.validity_days() != self.lease.validity_days {
            warn!(
                "Lease validity is {} days, expected {}",
                lease.validity_days(),
                self.lease.validity_days
            );
        }
        if lease.is_expired(now) {
            error!("Lease on disk expired at {}", lease.expires_at);
        }

        Some(lease)
    }
}
