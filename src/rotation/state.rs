//! Renewal coordination state machine

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RotationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalState {
    /// Services run normally on the current lease
    Idle,
    /// Pre-hook is stopping the proxy to free the challenge port
    PortReleasing,
    /// Port released; the CA client owns the challenge
    ChallengeInFlight,
    /// A new lease is on disk
    Issued,
    /// The CA client did not replace the lease
    Failed,
    /// Proxy and storage are being restarted; also the pending state after a
    /// failed reload
    ServicesReloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalEvent {
    PreHookInvoked,
    PortReleased,
    PortUnavailable,
    LeaseIssued,
    IssuanceFailed,
    WatchdogExpired,
    ReloadRequested,
    ServicesReloaded,
    ReloadFailed,
}

impl RenewalState {
    pub fn transition(self, event: RenewalEvent) -> Result<RenewalState, RotationError> {
        use RenewalEvent::*;
        use RenewalState::*;

        let next = match (self, event) {
            (Idle | PortReleasing | ChallengeInFlight | ServicesReloading, PreHookInvoked) => {
                PortReleasing
            }
            (PortReleasing, PortReleased) => ChallengeInFlight,
            (PortReleasing, PortUnavailable) => Idle,
            (PortReleasing | ChallengeInFlight, LeaseIssued) => Issued,
            (PortReleasing | ChallengeInFlight, IssuanceFailed | WatchdogExpired) => Failed,
            (Idle | Issued | Failed | ServicesReloading, ReloadRequested) => ServicesReloading,
            (ServicesReloading, ServicesReloaded) => Idle,
            (ServicesReloading, ReloadFailed) => ServicesReloading,
            (from, event) => return Err(RotationError::InvalidTransition { from, event }),
        };

        Ok(next)
    }

    /// A renewal cycle has started and the proxy may be down
    pub fn in_cycle(self) -> bool {
        matches!(self, RenewalState::PortReleasing | RenewalState::ChallengeInFlight)
    }

    /// Numeric form for the state gauge
    pub fn as_gauge(self) -> i64 {
        match self {
            RenewalState::Idle => 0,
            RenewalState::PortReleasing => 1,
            RenewalState::ChallengeInFlight => 2,
            RenewalState::Issued => 3,
            RenewalState::Failed => 4,
            RenewalState::ServicesReloading => 5,
        }
    }
}

impl Default for RenewalState {
    fn default() -> Self {
        RenewalState::Idle
    }
}

impl fmt::Display for RenewalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenewalState::Idle => "idle",
            RenewalState::PortReleasing => "port_releasing",
            RenewalState::ChallengeInFlight => "challenge_in_flight",
            RenewalState::Issued => "issued",
            RenewalState::Failed => "failed",
            RenewalState::ServicesReloading => "services_reloading",
        };
        f.write_str(name)
    }
}
