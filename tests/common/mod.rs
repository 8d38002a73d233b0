// Shared fixtures for the integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use certhook::config::{LeaseConfig, ServicesConfig};
use certhook::lease::LeasePaths;
use certhook::port::PortProbe;
use certhook::rotation::{RenewalOrchestrator, StateStore};
use certhook::supervisor::ServiceSupervisor;
use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PROXY: &str = "nginx";
pub const STORAGE: &str = "minio";
pub const DOMAIN: &str = "backoffice.example.com";

pub fn fixture_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures/certs");
    path.push(filename);
    path
}

#[derive(Default)]
struct Inner {
    running: HashMap<String, bool>,
    calls: Vec<(String, String)>,
    failing: HashSet<(String, String)>,
    listener: Option<TcpListener>,
    port_stuck: bool,
}

/// In-memory supervisor; the proxy holds a real listener while running
pub struct FakeSupervisor {
    inner: Mutex<Inner>,
    proxy_addr: SocketAddr,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let mut inner = Inner::default();
        inner.running.insert(PROXY.to_string(), true);
        inner.running.insert(STORAGE.to_string(), true);
        inner.listener = Some(listener);

        Self {
            inner: Mutex::new(inner),
            proxy_addr,
        }
    }

    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Make `op` ("stop", "start", "restart", "status") fail for `service`
    pub fn fail(&self, op: &str, service: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing
            .insert((op.to_string(), service.to_string()));
    }

    pub fn heal(&self) {
        self.inner.lock().unwrap().failing.clear();
    }

    /// Stopping the proxy no longer frees its port
    pub fn set_port_stuck(&self, stuck: bool) {
        self.inner.lock().unwrap().port_stuck = stuck;
    }

    /// Operator action outside the hooks
    pub fn stop_manually(&self, service: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.running.insert(service.to_string(), false);
        if service == PROXY {
            inner.listener = None;
        }
    }

    pub fn running(&self, service: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .running
            .get(service)
            .copied()
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: &str, service: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(o, s)| o == op && s == service)
            .count()
    }

    fn record(&self, op: &str, service: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((op.to_string(), service.to_string()));
        if inner.failing.contains(&(op.to_string(), service.to_string())) {
            anyhow::bail!("injected {} failure for {}", op, service);
        }
        Ok(())
    }

    fn set_running(&self, service: &str, running: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.running.insert(service.to_string(), running);
        if service != PROXY {
            return;
        }
        if running {
            if inner.listener.is_none() {
                inner.listener = TcpListener::bind(self.proxy_addr).ok();
            }
        } else if !inner.port_stuck {
            inner.listener = None;
        }
    }
}

#[async_trait]
impl ServiceSupervisor for FakeSupervisor {
    async fn stop(&self, service: &str) -> Result<()> {
        self.record("stop", service)?;
        self.set_running(service, false);
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<()> {
        self.record("start", service)?;
        self.set_running(service, true);
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.record("restart", service)?;
        self.set_running(service, true);
        Ok(())
    }

    async fn is_running(&self, service: &str) -> Result<bool> {
        self.record("status", service)?;
        Ok(self.running(service))
    }

    fn supervisor_name(&self) -> &str {
        "fake"
    }
}

/// Scratch lease directory, state file and orchestrator around a fake supervisor
pub struct Harness {
    pub dir: TempDir,
    pub supervisor: Arc<FakeSupervisor>,
    pub orchestrator: Arc<RenewalOrchestrator>,
    pub paths: LeasePaths,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_max_outage(900)
    }

    pub fn with_max_outage(max_outage_secs: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = LeasePaths::new(dir.path().join("fullchain.pem"), dir.path().join("privkey.pem"));
        let supervisor = Arc::new(FakeSupervisor::new());

        let probe = PortProbe::new(
            supervisor.proxy_addr(),
            Duration::from_millis(20),
            Duration::from_millis(500),
        );

        let lease = LeaseConfig {
            domain: DOMAIN.to_string(),
            fullchain_path: paths.fullchain.display().to_string(),
            privkey_path: paths.privkey.display().to_string(),
            validity_days: 3650,
            renewal_days_before_expiry: 30,
        };

        let orchestrator = RenewalOrchestrator::new(
            supervisor.clone(),
            ServicesConfig {
                proxy: PROXY.to_string(),
                storage: STORAGE.to_string(),
            },
            lease,
            probe,
            StateStore::new(dir.path().join("state/state.json")),
            max_outage_secs,
        );

        Self {
            dir,
            supervisor,
            orchestrator: Arc::new(orchestrator),
            paths,
        }
    }

    /// Harness with lease `name` (fixture prefix) already on disk
    pub fn with_lease(name: &str) -> Self {
        let harness = Self::new();
        harness.write_lease(name);
        harness
    }

    /// What the CA client does on a successful renewal
    pub fn write_lease(&self, name: &str) {
        std::fs::copy(fixture_path(&format!("{}.crt", name)), &self.paths.fullchain).unwrap();
        std::fs::copy(fixture_path(&format!("{}.key", name)), &self.paths.privkey).unwrap();
    }

    pub async fn fingerprint(&self) -> Option<String> {
        certhook::lease::CertificateLease::current_fingerprint(&self.paths).await
    }
}
