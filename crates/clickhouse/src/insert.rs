//! CSV batch inserts into ClickHouse.
//!
//! Rows are produced by `usage_core::transcode` and posted in one
//! zstd-compressed HTTP request per table.

use crate::client::ClickHouseClient;
use crate::schema::{OPERATIONS_TABLE, OPERATION_COLLECTION_TABLE, SUBSCRIPTION_OPERATIONS_TABLE};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, instrument, warn};
use usage_core::compression::compress_bytes;
use usage_core::{
    operations_to_csv, registry_to_csv, subscription_operations_to_csv, Error,
    ProcessedOperation, ProcessedRegistryRecord, ProcessedSubscriptionOperation, Result,
    OPERATIONS_COLUMNS, REGISTRY_COLUMNS, SUBSCRIPTION_OPERATIONS_COLUMNS,
};

/// Builds the `INSERT … FORMAT CSV` statement for a table.
pub fn insert_query(database: &str, table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {}.{} ({}) FORMAT CSV",
        database,
        table,
        columns.join(", ")
    )
}

/// Posts pre-rendered CSV rows into `table`. Empty input is a no-op.
#[instrument(skip(client, csv), fields(bytes = csv.len()))]
pub async fn insert_csv(
    client: &ClickHouseClient,
    table: &str,
    columns: &[&str],
    csv: String,
) -> Result<()> {
    if csv.is_empty() {
        return Ok(());
    }

    let config = client.config();
    let query = insert_query(&config.database, table, columns);
    let body = compress_bytes(csv.as_bytes())?;

    let mut request = client
        .http()
        .post(&config.url)
        .query(&[("query", query.as_str())])
        .header(CONTENT_TYPE, "text/csv")
        .header(CONTENT_ENCODING, "zstd")
        .body(body);

    if let Some(ref user) = config.username {
        request = request.basic_auth(user, config.password.as_deref());
    }

    let start = Instant::now();
    let result = request.send().await;
    metrics()
        .clickhouse_latency_ms
        .observe(start.elapsed().as_millis() as u64);

    let response = result.map_err(|e| {
        metrics().clickhouse_insert_errors.inc();
        Error::storage(format!("ClickHouse insert into {} failed: {}", table, e))
    })?;

    if !response.status().is_success() {
        metrics().clickhouse_insert_errors.inc();
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(table, status = %status, body = %body, "ClickHouse rejected insert");
        return Err(Error::storage(format!(
            "ClickHouse insert into {} returned {}: {}",
            table, status, body
        )));
    }

    debug!(table, "Inserted CSV batch");
    Ok(())
}

/// Insert operations.
pub async fn insert_operations(
    client: &ClickHouseClient,
    operations: &[ProcessedOperation],
) -> Result<usize> {
    if operations.is_empty() {
        return Ok(0);
    }

    insert_csv(
        client,
        OPERATIONS_TABLE,
        OPERATIONS_COLUMNS,
        operations_to_csv(operations),
    )
    .await?;
    metrics().operations_written.inc_by(operations.len() as u64);
    Ok(operations.len())
}

/// Insert subscription operations.
pub async fn insert_subscription_operations(
    client: &ClickHouseClient,
    operations: &[ProcessedSubscriptionOperation],
) -> Result<usize> {
    if operations.is_empty() {
        return Ok(0);
    }

    insert_csv(
        client,
        SUBSCRIPTION_OPERATIONS_TABLE,
        SUBSCRIPTION_OPERATIONS_COLUMNS,
        subscription_operations_to_csv(operations),
    )
    .await?;
    metrics().operations_written.inc_by(operations.len() as u64);
    Ok(operations.len())
}

/// Insert operation registry records.
pub async fn insert_registry(
    client: &ClickHouseClient,
    records: &[ProcessedRegistryRecord],
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    insert_csv(
        client,
        OPERATION_COLLECTION_TABLE,
        REGISTRY_COLUMNS,
        registry_to_csv(records),
    )
    .await?;
    metrics().registry_records_written.inc_by(records.len() as u64);
    Ok(records.len())
}
