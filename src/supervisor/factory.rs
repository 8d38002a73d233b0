//! Factory for creating supervisor instances from configuration

use super::{CommandSupervisor, ComposeSupervisor, ServiceSupervisor};
use crate::config::SupervisorConfig;
use std::sync::Arc;
use std::time::Duration;

pub fn create_supervisor(config: &SupervisorConfig) -> Arc<dyn ServiceSupervisor> {
    match config {
        SupervisorConfig::Compose { compose_file, project, binary, timeout_secs } => {
            Arc::new(ComposeSupervisor::new(
                binary.clone(),
                compose_file.clone(),
                project.clone(),
                Duration::from_secs(*timeout_secs),
            ))
        }
        SupervisorConfig::Command { stop, start, restart, status, timeout_secs } => {
            Arc::new(CommandSupervisor::new(
                stop.clone(),
                start.clone(),
                restart.clone(),
                status.clone(),
                Duration::from_secs(*timeout_secs),
            ))
        }
    }
}
