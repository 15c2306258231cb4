//! Transcoding of raw reports into storage rows.
//!
//! Transcoding is all-or-nothing per report: the columnar store expects a
//! complete, consistent batch, so one dangling map key rejects everything.

use chrono::DateTime;
use std::collections::BTreeMap;

use crate::cast::{cast_value, CastValue};
use crate::error::TranscodeError;
use crate::limits::{DEFAULT_RETENTION_DAYS, MS_PER_DAY};
use crate::report::{
    OperationKind, OperationMapRecord, OperationMetadata, ProcessedOperation,
    ProcessedRegistryRecord, ProcessedReport, ProcessedSubscriptionOperation, RawReport,
};

/// Column order of `operations` CSV rows.
pub const OPERATIONS_COLUMNS: &[&str] = &[
    "target",
    "timestamp",
    "expires_at",
    "hash",
    "ok",
    "errors",
    "duration",
    "client_name",
    "client_version",
];

/// Column order of `subscription_operations` CSV rows.
pub const SUBSCRIPTION_OPERATIONS_COLUMNS: &[&str] = &[
    "target",
    "timestamp",
    "expires_at",
    "hash",
    "client_name",
    "client_version",
];

/// Column order of `operation_collection` CSV rows.
pub const REGISTRY_COLUMNS: &[&str] = &[
    "total",
    "target",
    "hash",
    "name",
    "body",
    "operation_kind",
    "timestamp",
    "expires_at",
    "coordinates",
];

#[derive(Debug)]
struct RegistryAccumulator<'a> {
    record: &'a OperationMapRecord,
    size: u64,
    timestamp: i64,
    expires_at: i64,
}

impl<'a> RegistryAccumulator<'a> {
    fn observe(&mut self, timestamp: i64, expires_at: i64) {
        self.size += 1;
        self.timestamp = self.timestamp.max(timestamp);
        self.expires_at = self.expires_at.max(expires_at);
    }
}

/// Transcodes a raw report into its storage-ready projection.
///
/// Fails with the offending key when any operation references a map entry
/// missing from the report.
pub fn transcode(report: RawReport) -> Result<ProcessedReport, TranscodeError> {
    let mut registry: BTreeMap<&str, RegistryAccumulator<'_>> = BTreeMap::new();
    let mut operations = Vec::with_capacity(report.operations.len());
    let mut subscription_operations = Vec::with_capacity(report.subscription_operations.len());

    for op in &report.operations {
        let (timestamp, expires_at) = resolve_times(&report.id, op.timestamp, op.expires_at)?;
        track(&report, &mut registry, &op.operation_map_key, timestamp, expires_at)?;

        operations.push(ProcessedOperation {
            target: report.target.clone(),
            operation_hash: op.operation_map_key.clone(),
            timestamp,
            expires_at,
            execution: op.execution,
            metadata: op.metadata.clone(),
        });
    }

    for op in &report.subscription_operations {
        let (timestamp, expires_at) = resolve_times(&report.id, op.timestamp, op.expires_at)?;
        track(&report, &mut registry, &op.operation_map_key, timestamp, expires_at)?;

        subscription_operations.push(ProcessedSubscriptionOperation {
            target: report.target.clone(),
            operation_hash: op.operation_map_key.clone(),
            timestamp,
            expires_at,
            metadata: op.metadata.clone(),
        });
    }

    let registry = registry
        .into_iter()
        .map(|(hash, acc)| ProcessedRegistryRecord {
            size: acc.size,
            target: report.target.clone(),
            hash: hash.to_string(),
            name: acc.record.operation_name.clone(),
            body: acc.record.operation.clone(),
            operation_kind: OperationKind::detect(&acc.record.operation),
            timestamp: acc.timestamp,
            expires_at: acc.expires_at,
            coordinates: acc.record.fields.clone(),
        })
        .collect();

    Ok(ProcessedReport {
        id: report.id.clone(),
        target: report.target.clone(),
        operations,
        subscription_operations,
        registry,
    })
}

fn track<'a>(
    report: &'a RawReport,
    registry: &mut BTreeMap<&'a str, RegistryAccumulator<'a>>,
    key: &'a str,
    timestamp: i64,
    expires_at: i64,
) -> Result<(), TranscodeError> {
    let record = report
        .map
        .get(key)
        .ok_or_else(|| TranscodeError::MissingMapKey {
            report_id: report.id.clone(),
            key: key.to_string(),
        })?;

    registry
        .entry(key)
        .or_insert(RegistryAccumulator {
            record,
            size: 0,
            timestamp,
            expires_at,
        })
        .observe(timestamp, expires_at);

    Ok(())
}

fn resolve_times(
    report_id: &str,
    timestamp: i64,
    expires_at: Option<i64>,
) -> Result<(i64, i64), TranscodeError> {
    let in_range = |ms: i64| {
        DateTime::from_timestamp_millis(ms)
            .map(|_| ms)
            .ok_or_else(|| TranscodeError::InvalidTimestamp {
                report_id: report_id.to_string(),
                timestamp: ms,
            })
    };

    let timestamp = in_range(timestamp)?;
    let expires_at = match expires_at {
        Some(ms) => in_range(ms)?,
        None => timestamp
            .checked_add(DEFAULT_RETENTION_DAYS as i64 * MS_PER_DAY)
            .ok_or_else(|| TranscodeError::InvalidTimestamp {
                report_id: report_id.to_string(),
                timestamp,
            })
            .and_then(in_range)?,
    };

    Ok((timestamp, expires_at))
}

/// Formats epoch milliseconds as a `DateTime` column value.
fn datetime(ms: i64) -> CastValue {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| CastValue::Str(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
        .unwrap_or(CastValue::Null)
}

fn client_fields(metadata: Option<&OperationMetadata>) -> (CastValue, CastValue) {
    (
        metadata.and_then(|m| m.client_name()).into(),
        metadata.and_then(|m| m.client_version()).into(),
    )
}

fn csv_row(values: Vec<CastValue>) -> String {
    values.iter().map(cast_value).collect::<Vec<_>>().join(",")
}

fn csv_rows<T>(items: &[T], to_row: impl Fn(&T) -> Vec<CastValue>) -> String {
    items
        .iter()
        .map(|item| csv_row(to_row(item)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders operations as CSV rows in `OPERATIONS_COLUMNS` order.
pub fn operations_to_csv(operations: &[ProcessedOperation]) -> String {
    csv_rows(operations, |op| {
        let (client_name, client_version) = client_fields(op.metadata.as_ref());
        vec![
            op.target.as_str().into(),
            datetime(op.timestamp),
            datetime(op.expires_at),
            op.operation_hash.as_str().into(),
            op.execution.ok.into(),
            op.execution.errors_total.into(),
            op.execution.duration.into(),
            client_name,
            client_version,
        ]
    })
}

/// Renders subscription operations in `SUBSCRIPTION_OPERATIONS_COLUMNS` order.
pub fn subscription_operations_to_csv(operations: &[ProcessedSubscriptionOperation]) -> String {
    csv_rows(operations, |op| {
        let (client_name, client_version) = client_fields(op.metadata.as_ref());
        vec![
            op.target.as_str().into(),
            datetime(op.timestamp),
            datetime(op.expires_at),
            op.operation_hash.as_str().into(),
            client_name,
            client_version,
        ]
    })
}

/// Renders registry records in `REGISTRY_COLUMNS` order.
pub fn registry_to_csv(records: &[ProcessedRegistryRecord]) -> String {
    csv_rows(records, |record| {
        vec![
            record.size.into(),
            record.target.as_str().into(),
            record.hash.as_str().into(),
            record.name.clone().into(),
            record.body.as_str().into(),
            record.operation_kind.as_str().into(),
            datetime(record.timestamp),
            datetime(record.expires_at),
            record.coordinates.clone().into(),
        ]
    })
}
