//! PostgreSQL settings for the workflow store.

use std::str::FromStr;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{EngineError, EngineResult};

/// Database configuration, read from `POSTGRES_*` variables.
///
/// `POSTGRES_URL` wins over the individual host/port/user fields when set.
/// Every connection carries `statement_timeout`, so a hung query gives up
/// well before the execution lease it runs under expires.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// Per-statement limit in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "flowgate".to_string()
}

fn default_database() -> String {
    "flowgate".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("POSTGRES_").from_env::<DatabaseConfig>()
    }

    /// Connection options with the session settings the store relies on.
    pub fn connect_options(&self) -> EngineResult<PgConnectOptions> {
        let options = match self.url.as_deref() {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|e| EngineError::Config(format!("invalid POSTGRES_URL: {}", e)))?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.database),
        };

        Ok(options
            .application_name("flowgate")
            .options([("statement_timeout", self.statement_timeout_ms)]))
    }

    /// The statement timeout has to leave room inside one lease.
    pub fn check_lease(&self, lock_ttl: std::time::Duration) -> EngineResult<()> {
        let limit = u128::from(self.statement_timeout_ms);
        if limit == 0 || limit >= lock_ttl.as_millis() {
            return Err(EngineError::Config(format!(
                "POSTGRES_STATEMENT_TIMEOUT_MS ({}) must be non-zero and below the lease TTL ({}s)",
                self.statement_timeout_ms,
                lock_ttl.as_secs()
            )));
        }
        Ok(())
    }

    /// Where the pool connects, for logs. Never includes the password.
    pub fn describe(&self) -> String {
        match self.url.as_deref().map(PgConnectOptions::from_str) {
            Some(Ok(options)) => format!(
                "{}:{}/{}",
                options.get_host(),
                options.get_port(),
                options.get_database().unwrap_or("-")
            ),
            Some(Err(_)) => "<invalid url>".to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}
