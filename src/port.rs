//! Challenge port probe
//!
//! The ACME HTTP challenge needs the inbound port the proxy normally holds.
//! A successful TCP connect means something still listens on it.

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::config::ChallengeConfig;

#[derive(Debug, Clone)]
pub struct PortProbe {
    addr: SocketAddr,
    poll_interval: Duration,
    release_timeout: Duration,
}

impl PortProbe {
    pub fn new(addr: SocketAddr, poll_interval: Duration, release_timeout: Duration) -> Self {
        Self {
            addr,
            poll_interval,
            release_timeout,
        }
    }

    pub fn from_config(config: &ChallengeConfig) -> Result<Self> {
        Ok(Self::new(
            config.socket_addr()?,
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_secs(config.release_timeout_secs),
        ))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether a listener currently accepts connections on the port
    pub async fn is_bound(&self) -> bool {
        matches!(
            timeout(self.poll_interval, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }

    /// Poll until the port is free, failing after the release timeout
    pub async fn wait_until_free(&self) -> Result<()> {
        let deadline = Instant::now() + self.release_timeout;

        loop {
            if !self.is_bound().await {
                debug!("Port {} is free", self.addr);
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "port {} still accepting connections after {}s",
                    self.addr,
                    self.release_timeout.as_secs()
                );
            }
            sleep(self.poll_interval).await;
        }
    }
}
