//! Server configuration.
//!
//! Loaded from environment variables; every duration is given in whole
//! seconds. A missing data directory or lock-store URL is fatal at
//! startup.

use std::time::Duration;

use slotwise_core::{Error, Result};

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development (pretty logs).
    #[default]
    Dev,
    /// Production (JSON logs).
    Prod,
}

impl Environment {
    /// Returns true when running in development.
    #[must_use]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Returns the lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the slotwise API server and expiry worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment.
    pub env: Environment,

    /// HTTP server port.
    pub http_port: u16,

    /// Path to the reservation database directory. Required.
    pub data_dir: String,

    /// Lock-store connection URL (e.g. `redis://127.0.0.1:6379`).
    /// Required.
    pub redis_url: String,

    /// How long a pending appointment reserves its slot.
    pub appointment_ttl: Duration,

    /// How long a slot lock lives; also the critical-section deadline.
    pub lock_ttl: Duration,

    /// Graceful shutdown bound.
    pub shutdown_timeout: Duration,

    /// How often the expiry worker runs.
    pub worker_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `SLOTWISE_ENV` (`dev` | `prod`, default `dev`)
    /// - `SLOTWISE_HTTP_PORT` (default `8080`)
    /// - `SLOTWISE_DATA_DIR` (**required**)
    /// - `SLOTWISE_REDIS_URL` (**required**)
    /// - `SLOTWISE_APPOINTMENT_TTL_SECS` (default `600`)
    /// - `SLOTWISE_LOCK_TTL_SECS` (default `5`)
    /// - `SLOTWISE_SHUTDOWN_TIMEOUT_SECS` (default `10`)
    /// - `SLOTWISE_WORKER_INTERVAL_SECS` (default `60`)
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any present
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let env = match env_string("SLOTWISE_ENV").as_deref() {
            None | Some("dev") => Environment::Dev,
            Some("prod") => Environment::Prod,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "SLOTWISE_ENV must be dev or prod (got {other})"
                )));
            }
        };

        let data_dir = env_string("SLOTWISE_DATA_DIR")
            .ok_or_else(|| Error::InvalidInput("SLOTWISE_DATA_DIR is required".to_string()))?;
        let redis_url = env_string("SLOTWISE_REDIS_URL")
            .ok_or_else(|| Error::InvalidInput("SLOTWISE_REDIS_URL is required".to_string()))?;

        Ok(Self {
            env,
            http_port: env_u16("SLOTWISE_HTTP_PORT")?.unwrap_or(8080),
            data_dir,
            redis_url,
            appointment_ttl: env_duration_secs("SLOTWISE_APPOINTMENT_TTL_SECS", 600)?,
            lock_ttl: env_duration_secs("SLOTWISE_LOCK_TTL_SECS", 5)?,
            shutdown_timeout: env_duration_secs("SLOTWISE_SHUTDOWN_TIMEOUT_SECS", 10)?,
            worker_interval: env_duration_secs("SLOTWISE_WORKER_INTERVAL_SECS", 60)?,
        })
    }

    /// Builds a config with required fields set and every default applied,
    /// for tests and embedded use.
    #[must_use]
    pub fn for_test(data_dir: impl Into<String>, redis_url: impl Into<String>) -> Self {
        Self {
            env: Environment::Dev,
            http_port: 0,
            data_dir: data_dir.into(),
            redis_url: redis_url.into(),
            appointment_ttl: Duration::from_secs(600),
            lock_ttl: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            worker_interval: Duration::from_secs(60),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_duration_secs(name: &str, default_secs: u64) -> Result<Duration> {
    let Some(v) = env_string(name) else {
        return Ok(Duration::from_secs(default_secs));
    };
    let secs = v
        .parse::<u64>()
        .map_err(|e| Error::InvalidInput(format!("{name} must be whole seconds: {e}")))?;
    if secs == 0 {
        return Err(Error::InvalidInput(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_for_test_config() {
        let config = Config::for_test("/tmp/slotwise", "redis://127.0.0.1:6379");
        assert_eq!(config.env, Environment::Dev);
        assert_eq!(config.appointment_ttl, Duration::from_secs(600));
        assert_eq!(config.lock_ttl, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.worker_interval, Duration::from_secs(60));
    }

    #[test]
    fn environment_tags() {
        assert!(Environment::Dev.is_dev());
        assert!(!Environment::Prod.is_dev());
        assert_eq!(Environment::Prod.to_string(), "prod");
    }
}
