//! PostgreSQL configuration.

use serde::{Deserialize, Serialize};

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host; `mock` selects the in-memory stores.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Timeout for acquiring a pooled connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "registry".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_max_pool_size() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: String::new(),
            max_pool_size: default_max_pool_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PostgresConfig {
    /// Whether storage should be served from memory instead of PostgreSQL.
    pub fn is_mock(&self) -> bool {
        self.host.is_empty() || self.host == "mock"
    }
}
