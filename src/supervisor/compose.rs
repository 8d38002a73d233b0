//! docker compose backed supervisor

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::exec;
use super::ServiceSupervisor;

/// Drives services of a compose project through the compose CLI
#[derive(Debug, Clone)]
pub struct ComposeSupervisor {
    binary: String,
    compose_file: String,
    project: Option<String>,
    timeout: Duration,
}

impl ComposeSupervisor {
    pub fn new(
        binary: impl Into<String>,
        compose_file: impl Into<String>,
        project: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            compose_file: compose_file.into(),
            project,
            timeout,
        }
    }

    /// Full argv for a compose subcommand
    fn command(&self, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            self.binary.clone(),
            "compose".to_string(),
            "-f".to_string(),
            self.compose_file.clone(),
        ];
        if let Some(project) = &self.project {
            argv.push("-p".to_string());
            argv.push(project.clone());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }
}

#[async_trait]
impl ServiceSupervisor for ComposeSupervisor {
    async fn stop(&self, service: &str) -> Result<()> {
        info!("Stopping compose service {}", service);
        exec::run_checked(&self.command(&["stop", service]), self.timeout)
            .await
            .with_context(|| format!("Failed to stop {}", service))?;
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<()> {
        info!("Starting compose service {}", service);
        // `up` also creates a container that was removed, `start` would not
        exec::run_checked(&self.command(&["up", "-d", "--no-deps", service]), self.timeout)
            .await
            .with_context(|| format!("Failed to start {}", service))?;
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        info!("Restarting compose service {}", service);
        // Also recreates a container removed by `compose down`
        exec::run_checked(
            &self.command(&["up", "-d", "--no-deps", "--force-recreate", service]),
            self.timeout,
        )
            .await
            .with_context(|| format!("Failed to restart {}", service))?;
        Ok(())
    }

    async fn is_running(&self, service: &str) -> Result<bool> {
        let output = exec::run_checked(
            &self.command(&["ps", "--status", "running", "--quiet", service]),
            self.timeout,
        )
        .await
        .with_context(|| format!("Failed to query status of {}", service))?;

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn supervisor_name(&self) -> &str {
        "docker compose"
    }
}
