use chrono::Utc;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::lease::CertificateLease;
use crate::rotation::{HookRuns, RecoveryOutcome, RenewalState};

pub struct MetricsCollector {
    registry: Registry,
    hook_invocations: IntCounterVec,
    reload_failures: IntCounterVec,
    task_runs: IntCounterVec,
    watchdog_recoveries: IntCounter,
    lease_days_remaining: IntGauge,
    rotation_state: IntGauge,
    /// Persisted hook-run counts already added to `hook_invocations`
    synced_hook_runs: Mutex<HashMap<(String, String), u64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let hook_invocations = IntCounterVec::new(
            Opts::new("certhook_hook_invocations_total", "Hook and recovery invocations by outcome"),
            &["hook", "outcome"],
        )
        .expect("valid metric definition");

        let reload_failures = IntCounterVec::new(
            Opts::new("certhook_reload_failures_total", "Services that failed to restart"),
            &["service"],
        )
        .expect("valid metric definition");

        let task_runs = IntCounterVec::new(
            Opts::new("certhook_task_runs_total", "Scheduled task runs by outcome"),
            &["task", "outcome"],
        )
        .expect("valid metric definition");

        let watchdog_recoveries = IntCounter::new(
            "certhook_watchdog_recoveries_total",
            "Stalled renewal cycles restored by the watchdog",
        )
        .expect("valid metric definition");

        let lease_days_remaining = IntGauge::new(
            "certhook_lease_days_remaining",
            "Days until the lease on disk expires",
        )
        .expect("valid metric definition");

        let rotation_state = IntGauge::new(
            "certhook_rotation_state",
            "Renewal state (0 idle, 1 port_releasing, 2 challenge_in_flight, 3 issued, 4 failed, 5 services_reloading)",
        )
        .expect("valid metric definition");

        registry.register(Box::new(hook_invocations.clone())).expect("unique metric");
        registry.register(Box::new(reload_failures.clone())).expect("unique metric");
        registry.register(Box::new(task_runs.clone())).expect("unique metric");
        registry.register(Box::new(watchdog_recoveries.clone())).expect("unique metric");
        registry.register(Box::new(lease_days_remaining.clone())).expect("unique metric");
        registry.register(Box::new(rotation_state.clone())).expect("unique metric");

        Self {
            registry,
            hook_invocations,
            reload_failures,
            task_runs,
            watchdog_recoveries,
            lease_days_remaining,
            rotation_state,
            synced_hook_runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_hook(&self, hook: &str, outcome: &str) {
        self.hook_invocations.with_label_values(&[hook, outcome]).inc();
    }

    pub fn record_reload_failure(&self, service: &str) {
        self.reload_failures.with_label_values(&[service]).inc();
    }

    pub fn record_task_run(&self, task: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.task_runs.with_label_values(&[task, outcome]).inc();
    }

    /// Count a watchdog step; only actual restores bump the recovery counter
    pub fn record_recovery(&self, outcome: &RecoveryOutcome) {
        let label = match outcome {
            RecoveryOutcome::Healthy => "healthy",
            RecoveryOutcome::Waiting { .. } => "waiting",
            RecoveryOutcome::Restored(_) => {
                self.watchdog_recoveries.inc();
                "restored"
            }
            RecoveryOutcome::ReloadPending { .. } => "reload_pending",
        };
        self.record_hook("recover", label);
    }

    /// Fold hook runs counted by the hook processes into the counter
    ///
    /// The hooks persist lifetime counts in the rotation record; only the
    /// growth since the previous sync is added.
    pub fn sync_hook_runs(&self, runs: &HookRuns) {
        let mut synced = match self.synced_hook_runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for (hook, outcomes) in runs {
            for (outcome, &count) in outcomes {
                let seen = synced.entry((hook.clone(), outcome.clone())).or_insert(0);
                if count > *seen {
                    self.hook_invocations
                        .with_label_values(&[hook.as_str(), outcome.as_str()])
                        .inc_by(count - *seen);
                }
                *seen = count;
            }
        }
    }

    pub fn set_lease(&self, lease: &CertificateLease) {
        self.lease_days_remaining.set(lease.days_until_expiry(Utc::now()));
    }

    pub fn set_state(&self, state: RenewalState) {
        self.rotation_state.set(state.as_gauge());
    }

    pub fn lease_days_remaining(&self) -> i64 {
        self.lease_days_remaining.get()
    }

    pub fn export_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
