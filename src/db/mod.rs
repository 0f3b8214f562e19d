pub mod config;
pub mod operations;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::config::{DbConfig, DbConfigError};

/// Explicitly constructed persistence handle, injected into `AppState` by the
/// process entry point. All queries run through its pool.
#[derive(Clone)]
pub struct DatabaseProxy {
    config: DbConfig,
    pool: PgPool,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let config = DbConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(DbInitError::Sqlx)?;

        Ok(Arc::new(Self { config, pool }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.config.url
    }

    pub async fn check_health(&self) -> HealthCheckResult {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await;

        match result {
            Ok(Ok(_)) => HealthCheckResult::Healthy {
                latency: started.elapsed(),
            },
            Ok(Err(err)) => HealthCheckResult::Unhealthy {
                reason: err.to_string(),
            },
            Err(_) => HealthCheckResult::Unhealthy {
                reason: "timeout".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum HealthCheckResult {
    Healthy { latency: Duration },
    Unhealthy { reason: String },
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthCheckResult::Healthy { .. })
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
