//! Usage ingestion service.
//!
//! - `POST /usage` admission control against monthly operation limits
//! - Redpanda transport of compressed reports
//! - Ingestor writing transcoded rows to ClickHouse
//! - Deduplicated periodic jobs (dedup sweep, usage limit notices)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use clickhouse_client::query::ClickHouseUsageStore;
use clickhouse_client::{ClickHouseClient, ClickHouseConfig};
use postgres_store::{PostgresClient, PostgresConfig, PostgresDedupStore, PostgresOrganizationStore};
use ratelimit::{AdmissionController, ConfigCache, ConfigCacheSettings, TargetOrgIndex};
use redpanda::{Consumer, MemoryQueue, Producer, RedpandaConfig, ReportProducer};
use telemetry::{health, init_tracing_from_env};
use usage_core::limits::{
    DEFAULT_CONFIG_CACHE_CAPACITY, DEFAULT_CONFIG_CACHE_TTL_SECS, DEFAULT_TARGET_INDEX_REFRESH_SECS,
};
use usage_core::memory::{InMemoryDedupStore, InMemoryOrganizationStore, InMemoryUsageStore};
use usage_core::store::{DedupStore, OrganizationStore, UsageStore};
use usage_core::{Clock, SystemClock};
use worker::{
    DedupConfig, DedupPeriod, DedupSweepJob, DispatcherConfig, Ingestor, JobDedupGuard, LogWriter,
    MemorySource, ReportSource, ReportWriter, SchedulerConfig, TaskDispatcher, UsageLimitNoticeJob,
    WorkerScheduler,
};

/// Reports buffered in process when no brokers are configured.
const MEMORY_QUEUE_CAPACITY: usize = 10_000;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    postgres: PostgresConfig,
    #[serde(default)]
    clickhouse: ClickHouseConfig,
    #[serde(default)]
    redpanda: RedpandaConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    target_index: TargetIndexConfig,
    #[serde(default)]
    dedup: DedupConfig,
    #[serde(default)]
    dispatcher: DispatcherConfig,
    #[serde(default)]
    scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Organization config cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    capacity: u64,
    #[serde(default = "default_cache_ttl_secs")]
    ttl_secs: u64,
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CONFIG_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CONFIG_CACHE_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TargetIndexConfig {
    #[serde(default = "default_refresh_interval_secs")]
    refresh_interval_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_TARGET_INDEX_REFRESH_SECS
}

impl Default for TargetIndexConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23 needs an explicit crypto provider before any TLS handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing_from_env();

    info!("Starting usage ingestion v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // System of record
    let (organizations, dedup_store): (Arc<dyn OrganizationStore>, Arc<dyn DedupStore>) =
        if config.postgres.is_mock() {
            warn!("PostgreSQL host is mock, using in-memory organization and dedup stores");
            health().postgres.set_healthy();
            (
                Arc::new(InMemoryOrganizationStore::new()),
                Arc::new(InMemoryDedupStore::new()),
            )
        } else {
            let client = PostgresClient::new(&config.postgres)
                .context("Failed to create PostgreSQL pool")?;

            if postgres_store::health::check_connection(&client).await {
                health().postgres.set_healthy();
                info!("PostgreSQL connection: healthy");
            } else {
                health().postgres.set_unhealthy("Connection failed");
                error!("PostgreSQL connection: unhealthy");
            }

            postgres_store::migrations::run(&client)
                .await
                .context("Failed to run PostgreSQL migrations")?;

            (
                Arc::new(PostgresOrganizationStore::new(client.clone())),
                Arc::new(PostgresDedupStore::new(client)),
            )
        };

    // Columnar store
    let (usage, writer): (Arc<dyn UsageStore>, Arc<dyn ReportWriter>) =
        if config.clickhouse.is_mock() {
            warn!("ClickHouse URL is mock, usage counts are empty and rows are discarded");
            health().clickhouse.set_healthy();
            (Arc::new(InMemoryUsageStore::new()), Arc::new(LogWriter))
        } else {
            let clickhouse = ClickHouseClient::new(config.clickhouse.clone())
                .context("Failed to create ClickHouse client")?;

            if let Err(e) = clickhouse_client::schema::init_schema(&clickhouse).await {
                // Tables may already exist under a user without DDL rights
                error!("Failed to initialize ClickHouse schema: {}", e);
            }

            if clickhouse_client::health::check_connection(&clickhouse).await {
                health().clickhouse.set_healthy();
                info!("ClickHouse connection: healthy");
            } else {
                health().clickhouse.set_unhealthy("Connection failed");
                error!("ClickHouse connection: unhealthy");
            }

            (
                Arc::new(ClickHouseUsageStore::new(clickhouse.clone())),
                Arc::new(clickhouse),
            )
        };

    // Report transport
    let (producer, source): (Arc<dyn ReportProducer>, Arc<dyn ReportSource>) =
        if config.redpanda.is_mock() {
            warn!("Redpanda brokers are mock, reports stay in process");
            health().redpanda.set_healthy();
            let queue = Arc::new(MemoryQueue::new(MEMORY_QUEUE_CAPACITY));
            let source = MemorySource::new(
                queue.clone(),
                config.redpanda.consumer.batch_size,
                Duration::from_millis(config.redpanda.consumer.batch_timeout_ms),
            );
            (queue, Arc::new(source))
        } else {
            info!(
                brokers = %config.redpanda.broker_string(),
                topic = %config.redpanda.topic,
                sasl_username = config.redpanda.sasl_username.as_deref().unwrap_or("none"),
                "Loaded Redpanda config"
            );

            if redpanda::health::check_connection(&config.redpanda).await {
                health().redpanda.set_healthy();
                info!("Redpanda connection: healthy");
            } else {
                health().redpanda.set_unhealthy("Connection failed");
                error!("Redpanda connection: unhealthy");
            }

            (
                Arc::new(Producer::new(config.redpanda.clone())),
                Arc::new(Consumer::new(config.redpanda.clone())),
            )
        };

    // Admission control
    let index = Arc::new(TargetOrgIndex::with_log_observer(organizations.clone()));
    index
        .start(Duration::from_secs(config.target_index.refresh_interval_secs))
        .await
        .context("Failed to load target index")?;

    let configs = ConfigCache::new(
        organizations,
        ConfigCacheSettings {
            capacity: config.cache.capacity,
            ttl: Duration::from_secs(config.cache.ttl_secs),
        },
    )
    .context("Invalid config cache settings")?;

    let admission = Arc::new(AdmissionController::new(
        index.clone(),
        configs,
        usage,
        clock.clone(),
    ));

    // Background workers
    let period = DedupPeriod::months(config.dedup.period_months).context("Invalid dedup period")?;
    let guard = Arc::new(JobDedupGuard::new(dedup_store, period, clock.clone()));

    let mut scheduler = WorkerScheduler::new(&config.scheduler)
        .with_ingestor(Arc::new(Ingestor::new(source, writer)))
        .with_job(
            Arc::new(DedupSweepJob::new(guard.clone())),
            config.scheduler.dedup_sweep_interval(),
        );

    if config.dispatcher.notification_url.is_some() {
        let dispatcher = Arc::new(
            TaskDispatcher::new(config.dispatcher.clone())
                .context("Failed to create task dispatcher")?,
        );
        scheduler = scheduler.with_job(
            Arc::new(UsageLimitNoticeJob::new(
                admission.clone(),
                guard,
                dispatcher,
                clock,
            )),
            config.scheduler.usage_notice_interval(),
        );
    } else {
        info!("No notification_url configured, usage limit notices disabled");
    }

    let scheduler = Arc::new(scheduler);
    scheduler
        .start()
        .context("Failed to start background workers")?;

    // HTTP server
    let app = router(AppState::new(producer, admission));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    scheduler.stop();
    index.stop();

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from defaults, `config/default.toml` and `USAGE__*`
/// environment variables.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::with_prefix("USAGE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("redpanda.brokers")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
