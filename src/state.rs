use std::sync::Arc;

use crate::config::Config;
use crate::observability::metrics::MetricsCollector;
use crate::port::PortProbe;
use crate::rotation::{RenewalOrchestrator, StateStore};
use crate::supervisor::{create_supervisor, ServiceSupervisor};

/// Shared handles for the daemon and the management API
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RenewalOrchestrator>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(orchestrator: Arc<RenewalOrchestrator>, metrics: Arc<MetricsCollector>) -> Self {
        Self { orchestrator, metrics }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let supervisor = create_supervisor(&config.supervisor);
        let orchestrator = build_orchestrator(config, supervisor)?;
        Ok(Self::new(Arc::new(orchestrator), Arc::new(MetricsCollector::new())))
    }
}

/// Wire an orchestrator from configuration and a supervisor
pub fn build_orchestrator(
    config: &Config,
    supervisor: Arc<dyn ServiceSupervisor>,
) -> anyhow::Result<RenewalOrchestrator> {
    Ok(RenewalOrchestrator::new(
        supervisor,
        config.services.clone(),
        config.lease.clone(),
        PortProbe::from_config(&config.challenge)?,
        StateStore::new(config.state.path.clone()),
        config.watchdog.max_outage_secs,
    ))
}
