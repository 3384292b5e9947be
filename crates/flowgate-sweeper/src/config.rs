//! Sweeper configuration.

use anyhow::Result;
use std::time::Duration;

/// Sweeper process configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Identifier used as the lease owner prefix.
    pub instance_id: String,

    /// Time between sweep passes.
    pub interval: Duration,

    /// Base URL of the collaborator service (domain, directory, notifications).
    pub collaborator_url: String,

    /// Timeout for each collaborator call.
    pub collaborator_timeout: Duration,
}

impl SweeperConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let instance_id = std::env::var("FLOWGATE_INSTANCE_ID").unwrap_or_else(|_| default_instance_id());

        let interval_secs: u64 = std::env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let collaborator_url = std::env::var("FLOWGATE_COLLABORATOR_URL")
            .unwrap_or_else(|_| "http://localhost:8090".to_string());

        let timeout_secs: u64 = std::env::var("FLOWGATE_COLLABORATOR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        if interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            instance_id,
            interval: Duration::from_secs(interval_secs),
            collaborator_url,
            collaborator_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("sweeper-{}", host)
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            interval: Duration::from_secs(60),
            collaborator_url: "http://localhost:8090".to_string(),
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}
