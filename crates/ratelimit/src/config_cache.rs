//! Read-through cache of organization rate-limit configs.
//!
//! Entries live for a fixed TTL in a capacity-bounded LRU cache. Concurrent
//! misses for the same organization share a single pair of storage reads.

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use usage_core::limits::{DEFAULT_CONFIG_CACHE_CAPACITY, DEFAULT_CONFIG_CACHE_TTL_SECS};
use usage_core::store::OrganizationStore;
use usage_core::{Error, RateLimitOrganizationConfig, Result};

/// Capacity and staleness bound of the cache.
#[derive(Debug, Clone, Copy)]
pub struct ConfigCacheSettings {
    /// Maximum number of organizations held at once.
    pub capacity: u64,
    /// How long an entry may be served after it was loaded.
    pub ttl: Duration,
}

impl Default for ConfigCacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONFIG_CACHE_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_CONFIG_CACHE_TTL_SECS),
        }
    }
}

/// Organization config cache in front of the system of record.
#[derive(Clone)]
pub struct ConfigCache {
    store: Arc<dyn OrganizationStore>,
    cache: Cache<String, RateLimitOrganizationConfig>,
}

impl ConfigCache {
    /// Creates a cache. Both capacity and TTL must be non-zero.
    pub fn new(store: Arc<dyn OrganizationStore>, settings: ConfigCacheSettings) -> Result<Self> {
        if settings.capacity == 0 {
            return Err(Error::config("config cache capacity must be greater than 0"));
        }
        if settings.ttl.is_zero() {
            return Err(Error::config("config cache ttl must be greater than 0"));
        }

        let cache = Cache::builder()
            .max_capacity(settings.capacity)
            .time_to_live(settings.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Ok(Self { store, cache })
    }

    /// Returns the config of `organization_id`, loading it on a miss.
    ///
    /// An unknown organization yields `Error::NotFound` and nothing is cached.
    #[instrument(skip(self))]
    pub async fn get(&self, organization_id: &str) -> Result<RateLimitOrganizationConfig> {
        if let Some(config) = self.cache.get(organization_id).await {
            telemetry::metrics().config_cache_hits.inc();
            return Ok(config);
        }

        telemetry::metrics().config_cache_misses.inc();

        let store = Arc::clone(&self.store);
        let org = organization_id.to_string();

        self.cache
            .try_get_with(organization_id.to_string(), async move {
                debug!(organization_id = %org, "Loading organization config");
                load(store.as_ref(), &org).await
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }

    /// Drops the cached entry of `organization_id`, if any.
    pub async fn invalidate(&self, organization_id: &str) {
        self.cache.invalidate(organization_id).await;
    }

    /// Approximate number of cached entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Applies pending evictions and expirations.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

async fn load(
    store: &dyn OrganizationStore,
    organization_id: &str,
) -> Result<RateLimitOrganizationConfig> {
    let (info, billing) = tokio::try_join!(
        store.get_organizations_rate_limit_info(organization_id),
        store.get_organization_billing(organization_id),
    )?;

    let info =
        info.ok_or_else(|| Error::not_found(format!("organization {}", organization_id)))?;

    Ok(RateLimitOrganizationConfig::assemble(info, billing))
}
