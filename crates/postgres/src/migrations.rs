//! Tables owned by this service.
//!
//! Organizations, billing, projects and targets belong to the registry and
//! are only read here.

use crate::client::{storage_error, PostgresClient};
use tracing::info;
use usage_core::Result;

/// Lock table for periodic job deduplication.
pub const JOB_DEDUP_KEYS: &str = r#"
CREATE TABLE IF NOT EXISTS job_dedup_keys (
    key         TEXT PRIMARY KEY,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const JOB_DEDUP_KEYS_CREATED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS job_dedup_keys_created_at_idx
    ON job_dedup_keys (created_at)
"#;

/// Returns all DDL statements in order.
pub fn all_statements() -> Vec<&'static str> {
    vec![JOB_DEDUP_KEYS, JOB_DEDUP_KEYS_CREATED_AT_INDEX]
}

/// Creates the service's tables if they do not exist.
pub async fn run(client: &PostgresClient) -> Result<()> {
    let conn = client.get_connection().await?;

    for ddl in all_statements() {
        conn.batch_execute(ddl).await.map_err(storage_error)?;
    }

    info!("PostgreSQL migrations applied");
    Ok(())
}
