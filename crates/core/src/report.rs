//! Raw usage reports and their storage-ready projections.
//!
//! Raw types mirror the camelCase JSON emitted by GraphQL client agents.
//! Processed types are denormalized rows for the columnar store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::limits::MS_PER_DAY;

/// Ingestion-time envelope submitted by a client agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReport {
    /// Unique per submission.
    pub id: String,
    pub target: String,
    /// Operation count declared by the agent.
    pub size: u64,
    /// Operation shapes keyed by their short hash.
    pub map: HashMap<String, OperationMapRecord>,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
    #[serde(default)]
    pub subscription_operations: Vec<RawSubscriptionOperation>,
}

impl RawReport {
    /// Total number of recorded executions in the report.
    pub fn operation_count(&self) -> usize {
        self.operations.len() + self.subscription_operations.len()
    }

    /// Stamps every execution with `timestamp + retention_in_days`.
    ///
    /// Replaces any client-supplied expiry; rows live exactly as long as the
    /// organization's retention allows.
    pub fn apply_retention(&mut self, retention_in_days: u32) {
        let retention_ms = i64::from(retention_in_days) * MS_PER_DAY;
        for op in &mut self.operations {
            op.expires_at = Some(op.timestamp.saturating_add(retention_ms));
        }
        for op in &mut self.subscription_operations {
            op.expires_at = Some(op.timestamp.saturating_add(retention_ms));
        }
    }
}

/// Operation shape shared by every execution with the same hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMapRecord {
    /// Normalized operation document.
    pub operation: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Schema coordinates referenced by the document.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    pub operation_map_key: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub execution: Execution,
    #[serde(default)]
    pub metadata: Option<OperationMetadata>,
}

/// One recorded subscription event. Subscriptions carry no execution stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubscriptionOperation {
    pub operation_map_key: String,
    pub timestamp: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub metadata: Option<OperationMetadata>,
}

/// Execution outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub ok: bool,
    /// Nanoseconds.
    pub duration: u64,
    pub errors_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default)]
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl OperationMetadata {
    pub fn client_name(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.name.as_deref())
    }

    pub fn client_version(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.version.as_deref())
    }
}

/// Kind of GraphQL operation, derived from the document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Detects the kind from the first definition keyword.
    ///
    /// Leading comments and whitespace are skipped; a bare selection set
    /// (`{ ... }`) is a query.
    pub fn detect(body: &str) -> Self {
        let keyword = body
            .lines()
            .map(str::trim_start)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .flat_map(|line| line.split(|c: char| !c.is_ascii_alphabetic()))
            .find(|word| !word.is_empty())
            .unwrap_or("");

        match keyword {
            "mutation" => Self::Mutation,
            "subscription" => Self::Subscription,
            _ => Self::Query,
        }
    }
}

/// Storage-ready projection of a `RawOperation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedOperation {
    pub target: String,
    pub operation_hash: String,
    pub timestamp: i64,
    pub expires_at: i64,
    pub execution: Execution,
    pub metadata: Option<OperationMetadata>,
}

/// Storage-ready projection of a `RawSubscriptionOperation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSubscriptionOperation {
    pub target: String,
    pub operation_hash: String,
    pub timestamp: i64,
    pub expires_at: i64,
    pub metadata: Option<OperationMetadata>,
}

/// Columnar-store row describing one distinct operation document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRegistryRecord {
    /// Executions in the report referencing this document.
    pub size: u64,
    pub target: String,
    pub hash: String,
    pub name: Option<String>,
    pub body: String,
    pub operation_kind: OperationKind,
    pub timestamp: i64,
    pub expires_at: i64,
    pub coordinates: Vec<String>,
}

/// Complete transcoded batch for one raw report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReport {
    pub id: String,
    pub target: String,
    pub operations: Vec<ProcessedOperation>,
    pub subscription_operations: Vec<ProcessedSubscriptionOperation>,
    pub registry: Vec<ProcessedRegistryRecord>,
}
