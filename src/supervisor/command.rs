//! Supervisor driven by configured argv templates (systemd, s6, custom scripts)

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::exec;
use super::ServiceSupervisor;

/// Runs one argv template per operation, with `{service}` substituted
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    stop: Vec<String>,
    start: Vec<String>,
    restart: Vec<String>,
    status: Vec<String>,
    timeout: Duration,
}

impl CommandSupervisor {
    pub fn new(
        stop: Vec<String>,
        start: Vec<String>,
        restart: Vec<String>,
        status: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            stop,
            start,
            restart,
            status,
            timeout,
        }
    }
}

#[async_trait]
impl ServiceSupervisor for CommandSupervisor {
    async fn stop(&self, service: &str) -> Result<()> {
        info!("Stopping service {}", service);
        exec::run_checked(&exec::render(&self.stop, service), self.timeout)
            .await
            .with_context(|| format!("Failed to stop {}", service))?;
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<()> {
        info!("Starting service {}", service);
        exec::run_checked(&exec::render(&self.start, service), self.timeout)
            .await
            .with_context(|| format!("Failed to start {}", service))?;
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        info!("Restarting service {}", service);
        exec::run_checked(&exec::render(&self.restart, service), self.timeout)
            .await
            .with_context(|| format!("Failed to restart {}", service))?;
        Ok(())
    }

    /// Exit status 0 of the status command means running
    async fn is_running(&self, service: &str) -> Result<bool> {
        let output = exec::run(&exec::render(&self.status, service), self.timeout)
            .await
            .with_context(|| format!("Failed to query status of {}", service))?;
        Ok(output.status.success())
    }

    fn supervisor_name(&self) -> &str {
        "command"
    }
}
