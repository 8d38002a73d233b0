//! Persisted rotation record
//!
//! The two hooks run as separate processes, so the state machine position
//! survives between them in a small JSON file. Every read-modify-write of the
//! record happens under an exclusive lock on a sibling `.lock` file, shared
//! by the hooks, the daemon watchdog and the management API.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use super::{RenewalEvent, RenewalState};
use crate::error::RotationError;

/// Result of the last completed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    PortReleased,
    PortUnavailable,
    Renewed,
    RestoredPrevious,
    Reloaded,
    ReloadFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::PortReleased => "port_released",
            Outcome::PortUnavailable => "port_unavailable",
            Outcome::Renewed => "renewed",
            Outcome::RestoredPrevious => "restored_previous",
            Outcome::Reloaded => "reloaded",
            Outcome::ReloadFailed => "reload_failed",
        }
    }
}

/// Completed hook runs, by hook name then outcome
pub type HookRuns = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub state: RenewalState,
    pub entered_at: DateTime<Utc>,
    /// When the current cycle's pre-hook ran
    #[serde(default)]
    pub cycle_started_at: Option<DateTime<Utc>>,
    /// Lease fingerprint seen by the pre-hook
    #[serde(default)]
    pub previous_fingerprint: Option<String>,
    /// Lease fingerprint on disk when services were last reloaded
    #[serde(default)]
    pub bound_fingerprint: Option<String>,
    #[serde(default)]
    pub last_outcome: Option<Outcome>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Lifetime counts of hook runs, exported by the daemon
    #[serde(default)]
    pub hook_runs: HookRuns,
}

impl RotationRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: RenewalState::Idle,
            entered_at: now,
            cycle_started_at: None,
            previous_fingerprint: None,
            bound_fingerprint: None,
            last_outcome: None,
            last_error: None,
            hook_runs: HookRuns::new(),
        }
    }

    pub fn count_run(&mut self, hook: &str, outcome: Outcome) {
        *self
            .hook_runs
            .entry(hook.to_string())
            .or_default()
            .entry(outcome.as_str().to_string())
            .or_default() += 1;
    }

    /// Apply an event, stamping the entry time when the state changes
    pub fn apply(&mut self, event: RenewalEvent, now: DateTime<Utc>) -> Result<RenewalState, RotationError> {
        let next = self.state.transition(event)?;
        if next != self.state {
            tracing::debug!("Renewal state {} -> {} ({:?})", self.state, next, event);
            self.entered_at = now;
        }
        self.state = next;
        Ok(next)
    }

    /// Seconds spent in the current state
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entered_at).num_seconds()
    }
}

/// Exclusive hold on the rotation record, released on drop
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

/// File-backed store for the rotation record
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Wait for the exclusive record lock
    ///
    /// Hold the returned guard across load, supervisor calls and save.
    pub async fn lock(&self) -> Result<StoreLock> {
        self.create_parent().await?;

        let path = self.lock_path();
        tokio::task::spawn_blocking(move || -> Result<StoreLock> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", path.display()))?;
            Ok(StoreLock { _file: file })
        })
        .await
        .context("Lock task failed")?
    }

    /// Load the record; a missing file is a fresh idle record
    pub async fn load(&self) -> Result<RotationRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt rotation record: {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RotationRecord::new(Utc::now())),
            Err(e) => Err(e).with_context(|| format!("Failed to read rotation record: {}", self.path.display())),
        }
    }

    /// Write the record atomically (temp file + rename)
    pub async fn save(&self, record: &RotationRecord) -> Result<()> {
        self.create_parent().await?;

        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record).context("Failed to serialize rotation record")?;

        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }

    async fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
            }
        }
        Ok(())
    }
}
