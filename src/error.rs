//! Hook failure taxonomy and the exit codes reported to the CA client

use std::fmt;
use thiserror::Error;

use crate::rotation::{RenewalEvent, RenewalState};

/// Process exit codes of the `certhook` binary
pub mod exit_codes {
    /// Hook completed; for the pre-hook the challenge port is free, for the
    /// post-hook every service runs on the current lease
    pub const SUCCESS: u8 = 0;
    /// Unclassified failure
    pub const FAILURE: u8 = 1;
    /// Configuration could not be loaded or is invalid
    pub const CONFIG_ERROR: u8 = 2;
    /// Pre-hook could not free the challenge port; the CA client must abort
    pub const PORT_UNAVAILABLE: u8 = 10;
    /// Post-hook could not restart at least one service; operator alert
    pub const RELOAD_FAILED: u8 = 11;
    /// Rotation record unreadable or the requested step is not allowed
    pub const STATE_ERROR: u8 = 12;
}

/// One service that could not be brought back on the current lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadFailure {
    pub service: String,
    pub reason: String,
}

impl fmt::Display for ReloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("challenge port {addr} is still bound after stopping {service}: {reason}")]
    PortUnavailable {
        service: String,
        addr: String,
        reason: String,
    },

    #[error("service reload failed ({})", format_failures(.failures))]
    ReloadFailed { failures: Vec<ReloadFailure> },

    #[error("invalid renewal transition: {event:?} while {from:?}")]
    InvalidTransition {
        from: RenewalState,
        event: RenewalEvent,
    },

    #[error("rotation state error: {0:#}")]
    State(#[from] anyhow::Error),
}

fn format_failures(failures: &[ReloadFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RotationError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RotationError::PortUnavailable { .. } => exit_codes::PORT_UNAVAILABLE,
            RotationError::ReloadFailed { .. } => exit_codes::RELOAD_FAILED,
            RotationError::InvalidTransition { .. } | RotationError::State(_) => {
                exit_codes::STATE_ERROR
            }
        }
    }
}
