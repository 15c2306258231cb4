//! Testcontainer setup for PostgreSQL.

use postgres_store::PostgresConfig;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

/// Container handle for PostgreSQL.
pub struct TestPostgres {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    pub config: PostgresConfig,
}

impl TestPostgres {
    /// Uses `USAGE_TEST_POSTGRES_HOST` when set, otherwise starts a container.
    pub async fn start() -> Self {
        if let Some(host) = std::env::var("USAGE_TEST_POSTGRES_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self {
                container: None,
                config: PostgresConfig {
                    host,
                    port: std::env::var("USAGE_TEST_POSTGRES_PORT")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(5432),
                    password: std::env::var("USAGE_TEST_POSTGRES_PASSWORD").unwrap_or_default(),
                    ..Default::default()
                },
            };
        }

        let image = GenericImage::new("postgres", "16-alpine")
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            // The entrypoint restarts the server once after initdb.
            .with_wait_for(WaitFor::seconds(2))
            .with_exposed_port(5432.tcp())
            .with_env_var("POSTGRES_DB", "registry")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres");

        let container = image.start().await.expect("Failed to start PostgreSQL");
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        Self {
            container: Some(container),
            config: PostgresConfig {
                host: "127.0.0.1".to_string(),
                port,
                database: "registry".to_string(),
                username: "postgres".to_string(),
                password: "postgres".to_string(),
                ..Default::default()
            },
        }
    }
}
