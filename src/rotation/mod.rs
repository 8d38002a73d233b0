// Certificate rotation: state machine, persisted record and hook orchestration

pub mod orchestrator;
pub mod state;
pub mod store;

pub use orchestrator::{PreHookReport, RecoveryOutcome, ReloadReport, RenewalOrchestrator, RotationStatus};
pub use state::{RenewalEvent, RenewalState};
pub use store::{HookRuns, Outcome, RotationRecord, StateStore, StoreLock};
