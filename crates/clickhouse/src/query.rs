//! Usage queries against the operations table.

use crate::client::ClickHouseClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;
use usage_core::store::UsageStore;
use usage_core::{Error, Result};

/// Count operations of the given targets since a point in time.
pub async fn count_operations(
    client: &ClickHouseClient,
    targets: &[String],
    since: DateTime<Utc>,
) -> Result<u64> {
    if targets.is_empty() {
        return Ok(0);
    }

    let count: u64 = client
        .inner()
        .query("SELECT count() FROM operations WHERE has(?, target) AND timestamp >= toDateTime(?, 'UTC')")
        .bind(targets)
        .bind(since.timestamp())
        .fetch_one()
        .await
        .map_err(|e| Error::storage(format!("Query error: {}", e)))?;
    Ok(count)
}

/// [`UsageStore`] backed by ClickHouse.
#[derive(Clone)]
pub struct ClickHouseUsageStore {
    client: ClickHouseClient,
}

impl ClickHouseUsageStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UsageStore for ClickHouseUsageStore {
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    async fn count_operations(&self, targets: &[String], since: DateTime<Utc>) -> Result<u64> {
        count_operations(&self.client, targets, since).await
    }
}
