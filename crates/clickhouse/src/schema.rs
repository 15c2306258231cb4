//! ClickHouse table schemas.
//!
//! Column order of every table matches the CSV rows produced by
//! `usage_core::transcode`.

use crate::client::ClickHouseClient;
use tracing::debug;
use usage_core::{Error, Result};

pub const OPERATIONS_TABLE: &str = "operations";
pub const SUBSCRIPTION_OPERATIONS_TABLE: &str = "subscription_operations";
pub const OPERATION_COLLECTION_TABLE: &str = "operation_collection";

/// SQL for creating the database.
pub const CREATE_DATABASE: &str = r#"
CREATE DATABASE IF NOT EXISTS usage
"#;

/// One row per executed operation.
pub const CREATE_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS usage.operations (
    target LowCardinality(String),
    timestamp DateTime('UTC'),
    expires_at DateTime('UTC'),
    hash String,
    ok UInt8,
    errors UInt16,
    duration UInt64,
    client_name Nullable(String),
    client_version Nullable(String)
)
ENGINE = MergeTree()
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (target, hash, timestamp)
TTL expires_at
SETTINGS index_granularity = 8192
"#;

/// One row per subscription operation.
pub const CREATE_SUBSCRIPTION_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS usage.subscription_operations (
    target LowCardinality(String),
    timestamp DateTime('UTC'),
    expires_at DateTime('UTC'),
    hash String,
    client_name Nullable(String),
    client_version Nullable(String)
)
ENGINE = MergeTree()
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (target, hash, timestamp)
TTL expires_at
SETTINGS index_granularity = 8192
"#;

/// Operation registry: one row per distinct document per target.
///
/// `total` accumulates across reports; the remaining columns describe the
/// document and keep any value on merge.
pub const CREATE_OPERATION_COLLECTION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS usage.operation_collection (
    total UInt32,
    target LowCardinality(String),
    hash String,
    name Nullable(String),
    body String,
    operation_kind LowCardinality(String),
    timestamp DateTime('UTC'),
    expires_at DateTime('UTC'),
    coordinates Array(String)
)
ENGINE = SummingMergeTree(total)
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (target, hash)
TTL expires_at
SETTINGS index_granularity = 8192
"#;

/// All table creation statements.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_DATABASE,
        CREATE_OPERATIONS_TABLE,
        CREATE_SUBSCRIPTION_OPERATIONS_TABLE,
        CREATE_OPERATION_COLLECTION_TABLE,
    ]
}

/// Initialize the database schema.
///
/// Creates the database and all tables if they don't exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    for sql in all_tables() {
        client
            .inner()
            .query(sql)
            .execute()
            .await
            .map_err(|e| Error::storage(format!("Schema init error: {}", e)))?;
    }

    debug!("ClickHouse schema initialized");
    Ok(())
}
