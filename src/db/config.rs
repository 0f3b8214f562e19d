use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(DbConfigError::Missing {
                key: "DATABASE_URL",
            })?;

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(10);

        let acquire_timeout_ms = std::env::var("DATABASE_ACQUIRE_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(5000);

        Ok(Self {
            url,
            max_connections,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
        })
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("missing environment variable {key}")]
    Missing { key: &'static str },
}
