//! Periodic zero-argument operations
//!
//! The web application's expired-token pruning runs here on a daily cadence.
//! Operations are idempotent, so a missed or repeated tick is harmless.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::TaskConfig;
use crate::observability::metrics::MetricsCollector;
use crate::supervisor::exec;

/// A zero-argument, idempotent, side-effecting operation
#[async_trait]
pub trait ScheduledOperation: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// Operation backed by an external command
#[derive(Debug, Clone)]
pub struct CommandOperation {
    name: String,
    command: Vec<String>,
    timeout: Duration,
}

impl CommandOperation {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            timeout,
        }
    }

    pub fn from_config(task: &TaskConfig) -> Self {
        Self::new(
            task.name.clone(),
            task.command.clone(),
            Duration::from_secs(task.timeout_secs),
        )
    }
}

#[async_trait]
impl ScheduledOperation for CommandOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let output = exec::run_checked(&self.command, self.timeout)
            .await
            .with_context(|| format!("Task {} failed", self.name))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Task {} output: {}", self.name, stdout.trim());
        }
        Ok(())
    }
}

/// A scheduled operation and its cadence
pub struct ScheduledTask {
    pub operation: Arc<dyn ScheduledOperation>,
    pub every: Duration,
}

/// Runs every task on its own interval until aborted
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Scheduler {
    pub fn new(metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            tasks: Vec::new(),
            metrics,
        }
    }

    pub fn from_config(tasks: &[TaskConfig], metrics: Option<Arc<MetricsCollector>>) -> Self {
        let mut scheduler = Self::new(metrics);
        for task in tasks {
            scheduler.add(
                Arc::new(CommandOperation::from_config(task)),
                Duration::from_secs(task.interval_secs),
            );
        }
        scheduler
    }

    pub fn add(&mut self, operation: Arc<dyn ScheduledOperation>, every: Duration) {
        self.tasks.push(ScheduledTask { operation, every });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn one loop per task. The first, immediate tick is skipped.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        self.tasks
            .into_iter()
            .map(|task| {
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    info!(
                        "Scheduling task {} every {}s",
                        task.operation.name(),
                        task.every.as_secs()
                    );

                    let mut timer = interval(task.every);
                    timer.tick().await;

                    loop {
                        timer.tick().await;
                        run_once(task.operation.as_ref(), metrics.as_deref()).await;
                    }
                })
            })
            .collect()
    }
}

/// Run an operation once, logging and counting the result
pub async fn run_once(operation: &dyn ScheduledOperation, metrics: Option<&MetricsCollector>) -> bool {
    debug!("Running scheduled task {}", operation.name());

    let result = operation.run().await;
    if let Some(metrics) = metrics {
        metrics.record_task_run(operation.name(), result.is_ok());
    }

    match result {
        Ok(()) => {
            info!("Task {} completed", operation.name());
            true
        }
        Err(e) => {
            error!("Task {} failed: {:#}", operation.name(), e);
            false
        }
    }
}
