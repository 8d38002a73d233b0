//! Lease file watcher
//!
//! Observes the lease directory and re-reads the lease after the CA client
//! replaces it, keeping the lease metrics current. It never restarts
//! services: that is the post-renewal hook's job.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::lease::{CertificateLease, LeasePaths};
use crate::observability::metrics::MetricsCollector;

pub struct LeaseWatcher {
    paths: LeasePaths,
    metrics: Arc<MetricsCollector>,
    /// Quiet period before re-reading, the CA client writes several files
    debounce_duration: Duration,
}

impl LeaseWatcher {
    pub fn new(paths: LeasePaths, metrics: Arc<MetricsCollector>, debounce_secs: u64) -> Self {
        Self {
            paths,
            metrics,
            debounce_duration: Duration::from_secs(debounce_secs),
        }
    }

    /// Directories whose entries make up the lease
    fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = [&self.paths.fullchain, &self.paths.privkey]
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Whether an event touches the chain or key file
    fn is_relevant(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event
            .paths
            .iter()
            .any(|p| p == &self.paths.fullchain || p == &self.paths.privkey)
    }

    /// Re-read the lease and update the gauge
    pub async fn refresh(&self) -> Result<CertificateLease> {
        let lease = CertificateLease::load(&self.paths).await?;
        self.metrics.set_lease(&lease);
        Ok(lease)
    }

    /// Spawn the watch loop; the returned handle owns the notify watcher
    pub fn start(self: Arc<Self>) -> Result<tokio::task::JoinHandle<()>> {
        let dirs = self.directories();
        if dirs.is_empty() {
            anyhow::bail!("No lease directories to watch");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => error!("Lease watcher error: {}", e),
            }
        })
        .context("Failed to create file watcher")?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch directory: {:?}", dir))?;
        }

        info!("Lease watcher started for {} directories", dirs.len());

        let handle = tokio::spawn(async move {
            // Dropping the watcher stops notifications
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                if !self.is_relevant(&event) {
                    continue;
                }
                debug!("Lease file change: {:?}", event.kind);

                sleep(self.debounce_duration).await;
                while rx.try_recv().is_ok() {}

                match self.refresh().await {
                    Ok(lease) => info!(
                        "Lease on disk changed: fingerprint {}, expires {}",
                        lease.fingerprint, lease.expires_at
                    ),
                    Err(e) => warn!("Lease changed but could not be read: {:#}", e),
                }
            }

            warn!("Lease watcher event loop terminated");
        });

        Ok(handle)
    }
}
