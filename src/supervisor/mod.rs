//! Service Supervisor abstraction: the process-lifecycle manager owning the
//! reverse proxy and the object-storage service

pub mod command;
pub mod compose;
pub mod exec;
pub mod factory;

pub use command::CommandSupervisor;
pub use compose::ComposeSupervisor;
pub use factory::create_supervisor;

use anyhow::Result;
use async_trait::async_trait;

/// Control surface of the Service Supervisor
///
/// Every call returns only once the supervisor has confirmed completion or
/// the call timed out. Stopping a stopped service and restarting a running
/// one must succeed.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Stop a service
    async fn stop(&self, service: &str) -> Result<()>;

    /// Start a service if it is not running
    async fn start(&self, service: &str) -> Result<()>;

    /// Restart a service, starting it if it is stopped
    async fn restart(&self, service: &str) -> Result<()>;

    /// Whether the service is currently running
    async fn is_running(&self, service: &str) -> Result<bool>;

    /// Get supervisor name for logging
    fn supervisor_name(&self) -> &str;
}
