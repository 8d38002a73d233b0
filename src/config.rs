use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::lease::LeasePaths;

/// Placeholder substituted with the service name in command templates
pub const SERVICE_PLACEHOLDER: &str = "{service}";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub lease: LeaseConfig,
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LeaseConfig {
    pub domain: String,
    pub fullchain_path: String,
    pub privkey_path: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    #[serde(default = "default_renewal_days")]
    pub renewal_days_before_expiry: i64,
}

fn default_validity_days() -> i64 { 90 }
fn default_renewal_days() -> i64 { 30 }

impl LeaseConfig {
    pub fn paths(&self) -> LeasePaths {
        LeasePaths::new(&self.fullchain_path, &self.privkey_path)
    }
}

/// How services are stopped and restarted
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorConfig {
    /// docker compose project owning the proxy and storage containers
    Compose {
        compose_file: String,
        #[serde(default)]
        project: Option<String>,
        #[serde(default = "default_compose_binary")]
        binary: String,
        #[serde(default = "default_supervisor_timeout")]
        timeout_secs: u64,
    },
    /// Arbitrary argv templates, e.g. `["systemctl", "stop", "{service}"]`
    Command {
        stop: Vec<String>,
        start: Vec<String>,
        restart: Vec<String>,
        status: Vec<String>,
        #[serde(default = "default_supervisor_timeout")]
        timeout_secs: u64,
    },
}

fn default_compose_binary() -> String { "docker".to_string() }
fn default_supervisor_timeout() -> u64 { 60 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServicesConfig {
    #[serde(default = "default_proxy_service")]
    pub proxy: String,
    #[serde(default = "default_storage_service")]
    pub storage: String,
}

fn default_proxy_service() -> String { "nginx".to_string() }
fn default_storage_service() -> String { "minio".to_string() }

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy_service(),
            storage: default_storage_service(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChallengeConfig {
    #[serde(default = "default_challenge_host")]
    pub host: String,
    #[serde(default = "default_challenge_port")]
    pub port: u16,
    #[serde(default = "default_release_timeout")]
    pub release_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_challenge_host() -> String { "127.0.0.1".to_string() }
fn default_challenge_port() -> u16 { 80 }
fn default_release_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 250 }

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            host: default_challenge_host(),
            port: default_challenge_port(),
            release_timeout_secs: default_release_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ChallengeConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid challenge address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf { PathBuf::from("/var/lib/certhook/state.json") }

impl Default for StateConfig {
    fn default() -> Self {
        Self { path: default_state_path() }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_max_outage")]
    pub max_outage_secs: u64,
    #[serde(default = "default_watchdog_interval")]
    pub check_interval_secs: u64,
}

fn default_max_outage() -> u64 { 900 }
fn default_watchdog_interval() -> u64 { 60 }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_outage_secs: default_max_outage(),
            check_interval_secs: default_watchdog_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
}

fn default_api_addr() -> String { "127.0.0.1:9180".to_string() }

impl Default for ApiConfig {
    fn default() -> Self {
        Self { listen_addr: default_api_addr() }
    }
}

/// A zero-argument operation run on a fixed cadence
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default = "default_task_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_task_timeout")]
    pub timeout_secs: u64,
}

fn default_task_interval() -> u64 { 24 * 60 * 60 }
fn default_task_timeout() -> u64 { 300 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_output() -> String { "console".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: None,
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    parse_config(&contents).with_context(|| format!("Invalid config file: {}", path))
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.lease.domain.trim().is_empty() {
        anyhow::bail!("lease.domain must not be empty");
    }
    if config.lease.fullchain_path.is_empty() || config.lease.privkey_path.is_empty() {
        anyhow::bail!("lease.fullchain_path and lease.privkey_path must be set");
    }
    if config.lease.validity_days <= 0 {
        anyhow::bail!("lease.validity_days must be positive");
    }

    if config.services.proxy.is_empty() || config.services.storage.is_empty() {
        anyhow::bail!("services.proxy and services.storage must be set");
    }
    if config.services.proxy == config.services.storage {
        anyhow::bail!(
            "services.proxy and services.storage must differ (both are '{}')",
            config.services.proxy
        );
    }

    match &config.supervisor {
        SupervisorConfig::Compose { compose_file, binary, timeout_secs, .. } => {
            if compose_file.is_empty() || binary.is_empty() {
                anyhow::bail!("supervisor.compose_file and supervisor.binary must be set");
            }
            if *timeout_secs == 0 {
                anyhow::bail!("supervisor.timeout_secs must be positive");
            }
        }
        SupervisorConfig::Command { stop, start, restart, status, timeout_secs } => {
            for (name, template) in [("stop", stop), ("start", start), ("restart", restart), ("status", status)] {
                if template.is_empty() {
                    anyhow::bail!("supervisor.{} template must not be empty", name);
                }
                if !template.iter().any(|arg| arg.contains(SERVICE_PLACEHOLDER)) {
                    anyhow::bail!(
                        "supervisor.{} template must reference {}",
                        name,
                        SERVICE_PLACEHOLDER
                    );
                }
            }
            if *timeout_secs == 0 {
                anyhow::bail!("supervisor.timeout_secs must be positive");
            }
        }
    }

    if config.challenge.port == 0 {
        anyhow::bail!("challenge.port must not be 0");
    }
    config.challenge.socket_addr()?;
    if config.challenge.poll_interval_ms == 0 {
        anyhow::bail!("challenge.poll_interval_ms must be positive");
    }

    if config.watchdog.check_interval_secs == 0 {
        anyhow::bail!("watchdog.check_interval_secs must be positive");
    }
    if i64::try_from(config.watchdog.max_outage_secs).is_err() {
        anyhow::bail!(
            "watchdog.max_outage_secs is too large ({})",
            config.watchdog.max_outage_secs
        );
    }

    config
        .api
        .listen_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid api.listen_addr: {}", config.api.listen_addr))?;

    let mut task_names = HashSet::new();
    for task in &config.tasks {
        if task.name.is_empty() {
            anyhow::bail!("Task name must not be empty");
        }
        if !task_names.insert(task.name.as_str()) {
            anyhow::bail!("Duplicate task name: {}", task.name);
        }
        if task.command.is_empty() {
            anyhow::bail!("Task {} has an empty command", task.name);
        }
        if task.interval_secs == 0 {
            anyhow::bail!("Task {} must have a positive interval", task.name);
        }
        if task.timeout_secs == 0 {
            anyhow::bail!("Task {} must have a positive timeout", task.name);
        }
    }

    if config.logging.output == "file" && config.logging.file_path.is_none() {
        anyhow::bail!("logging.file_path is required when logging.output = \"file\"");
    }

    Ok(())
}
