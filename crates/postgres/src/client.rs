//! Pooled PostgreSQL client.

use crate::config::PostgresConfig;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info};
use usage_core::{Error, Result};

/// PostgreSQL client wrapper with connection pooling.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
}

impl PostgresClient {
    /// Creates a pool. No connection is opened until first use.
    pub fn new(config: &PostgresConfig) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user = Some(config.username.clone());
        cfg.password = Some(config.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let wait = Duration::from_secs(config.connect_timeout_secs);
        let mut pool_config = PoolConfig::new(config.max_pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(wait),
            create: Some(wait),
            recycle: Some(wait),
        };
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::config(format!("Invalid PostgreSQL config: {}", e)))?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Created PostgreSQL pool"
        );

        Ok(Self { pool })
    }

    /// Pings the database to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        let client = self.get_connection().await?;
        client.execute("SELECT 1", &[]).await.map_err(storage_error)?;
        debug!("PostgreSQL connection successful");
        Ok(())
    }

    /// Gets a connection from the pool.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Client> {
        self.pool.get().await.map_err(storage_error)
    }
}

/// Maps any driver or pool failure to a transient storage error.
pub(crate) fn storage_error(err: impl std::fmt::Display) -> Error {
    Error::storage(format!("PostgreSQL: {}", err))
}
