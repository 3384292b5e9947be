//! Engine behaviour configuration.

use std::time::Duration;

use serde::Deserialize;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `FLOWGATE_`:
/// - `FLOWGATE_MAX_STEPS_PER_INVOCATION`: Node budget per start/resume call (default: 100)
/// - `FLOWGATE_LOCK_TTL_SECS`: Execution lease duration in seconds (default: 300)
/// - `FLOWGATE_STRICT_ASSIGNMENT`: Fail on unresolved dynamic assignees (default: false)
/// - `FLOWGATE_DEFAULT_INTEGRATION_TIMEOUT_MS`: Integration timeout when a node sets none (default: 10000)
/// - `FLOWGATE_INSTANCE_ID`: Lease owner identity (default: random UUID)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of nodes processed in a single invocation
    #[serde(default = "default_max_steps")]
    pub max_steps_per_invocation: usize,

    /// Execution lease duration in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Treat unresolved dynamic assignment targets as fatal
    #[serde(default)]
    pub strict_assignment: bool,

    /// Integration timeout used when the node does not configure one
    #[serde(default = "default_integration_timeout_ms")]
    pub default_integration_timeout_ms: u64,

    /// Identity used as the lease owner
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

fn default_max_steps() -> usize {
    100
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_integration_timeout_ms() -> u64 {
    10_000
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `FLOWGATE_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("FLOWGATE_").from_env::<EngineConfig>()
    }

    /// Lease duration as a `Duration`.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_invocation: default_max_steps(),
            lock_ttl_secs: default_lock_ttl(),
            strict_assignment: false,
            default_integration_timeout_ms: default_integration_timeout_ms(),
            instance_id: default_instance_id(),
        }
    }
}
