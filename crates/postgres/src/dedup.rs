//! PostgreSQL lock table for job deduplication.

use crate::client::{storage_error, PostgresClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use usage_core::store::DedupStore;
use usage_core::Result;

/// Inserts the key, or refreshes it only when the existing row is stale.
/// A returned row means the caller owns the period.
const CLAIM: &str = r#"
INSERT INTO job_dedup_keys (key, created_at)
VALUES ($1, $2)
ON CONFLICT (key) DO UPDATE
    SET created_at = EXCLUDED.created_at
    WHERE job_dedup_keys.created_at < $3
RETURNING key
"#;

const RELEASE: &str = "DELETE FROM job_dedup_keys WHERE key = $1";

const DELETE_OLDER_THAN: &str = "DELETE FROM job_dedup_keys WHERE created_at < $1";

/// PostgreSQL implementation of [`DedupStore`].
#[derive(Clone)]
pub struct PostgresDedupStore {
    client: PostgresClient,
}

impl PostgresDedupStore {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DedupStore for PostgresDedupStore {
    #[instrument(skip(self))]
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.client.get_connection().await?;

        let row = conn
            .query_opt(CLAIM, &[&key, &now, &stale_before])
            .await
            .map_err(storage_error)?;

        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str) -> Result<()> {
        let conn = self.client.get_connection().await?;
        conn.execute(RELEASE, &[&key]).await.map_err(storage_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.client.get_connection().await?;

        let deleted = conn
            .execute(DELETE_OLDER_THAN, &[&cutoff])
            .await
            .map_err(storage_error)?;

        debug!(deleted, "Swept dedup keys");
        Ok(deleted)
    }
}
