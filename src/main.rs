use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};

use certhook::config::{self, Config};
use certhook::error::{exit_codes, RotationError};
use certhook::observability;
use certhook::rotation::RecoveryOutcome;
use certhook::schedule::{self, CommandOperation};
use certhook::state::AppState;

#[derive(Parser)]
#[command(name = "certhook")]
#[command(about = "Certificate renewal hooks for the reverse proxy and object storage", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop the reverse proxy and wait until the challenge port is free
    PreHook,
    /// Restart the reverse proxy and storage on the lease currently on disk
    PostHook,
    /// Restore services if a renewal cycle has stalled
    Recover {
        /// Restore even if the outage limit has not been reached
        #[arg(long)]
        force: bool,
    },
    /// Print the rotation record and lease summary as JSON
    Status,
    /// Validate the configuration and exit
    Check,
    /// Run a configured scheduled task once
    RunTask {
        /// Task name from the [[tasks]] table
        name: String,
    },
    /// Run the management API, watchdog, scheduler and lease watcher
    Daemon,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("certhook: {:#}", e);
            return ExitCode::from(exit_codes::CONFIG_ERROR);
        }
    };
    let _guard = observability::logging::init_logging(&config.logging);

    let state = match AppState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialise: {:#}", e);
            return ExitCode::from(exit_codes::CONFIG_ERROR);
        }
    };

    ExitCode::from(run(cli.command, config, state).await)
}

async fn run(command: Commands, config: Config, state: AppState) -> u8 {
    match command {
        Commands::PreHook => match state.orchestrator.pre_renewal().await {
            Ok(report) => {
                info!("Pre-renewal hook complete: {} stopped, {} free", report.proxy, report.port);
                exit_codes::SUCCESS
            }
            Err(e) => rotation_failure("pre-renewal", e),
        },
        Commands::PostHook => match state.orchestrator.post_renewal().await {
            Ok(report) => {
                info!(
                    "Post-renewal hook complete ({:?}): restarted {}",
                    report.outcome,
                    report.restarted.join(", ")
                );
                exit_codes::SUCCESS
            }
            Err(e) => rotation_failure("post-renewal", e),
        },
        Commands::Recover { force } => match state.orchestrator.recover(force).await {
            Ok(RecoveryOutcome::Healthy) => {
                info!("No stalled renewal cycle");
                exit_codes::SUCCESS
            }
            Ok(RecoveryOutcome::Waiting { state, remaining_secs }) => {
                info!("Cycle in {} for now, watchdog fires in {}s", state, remaining_secs);
                exit_codes::SUCCESS
            }
            Ok(RecoveryOutcome::Restored(report)) => {
                info!("Services restored: {}", report.restarted.join(", "));
                exit_codes::SUCCESS
            }
            Ok(RecoveryOutcome::ReloadPending { since, last_error }) => {
                error!(
                    "Service reload failed at {} and is still pending ({}); rerun with --force once fixed",
                    since,
                    last_error.unwrap_or_default()
                );
                exit_codes::RELOAD_FAILED
            }
            Err(e) => rotation_failure("recovery", e),
        },
        Commands::Status => match state.orchestrator.status().await {
            Ok(status) => match serde_json::to_string_pretty(&status) {
                Ok(json) => {
                    println!("{}", json);
                    exit_codes::SUCCESS
                }
                Err(e) => {
                    error!("Failed to serialize status: {}", e);
                    exit_codes::FAILURE
                }
            },
            Err(e) => rotation_failure("status", e),
        },
        Commands::Check => {
            info!(
                "Configuration valid: lease for {}, services {} and {}",
                config.lease.domain, config.services.proxy, config.services.storage
            );
            exit_codes::SUCCESS
        }
        Commands::RunTask { name } => {
            let Some(task) = config.tasks.iter().find(|t| t.name == name) else {
                error!("No task named {}", name);
                return exit_codes::CONFIG_ERROR;
            };
            let operation = CommandOperation::from_config(task);
            if schedule::run_once(&operation, None).await {
                exit_codes::SUCCESS
            } else {
                exit_codes::FAILURE
            }
        }
        Commands::Daemon => {
            info!("Starting certhook daemon for {}", config.lease.domain);
            match certhook::daemon::run(config, state).await {
                Ok(()) => exit_codes::SUCCESS,
                Err(e) => {
                    error!("Daemon error: {:#}", e);
                    exit_codes::FAILURE
                }
            }
        }
    }
}

fn rotation_failure(step: &str, e: RotationError) -> u8 {
    error!("{} failed: {}", step, e);
    e.exit_code()
}
