//! Storage collaborator contracts.
//!
//! All implementations report "not found" as `Ok(None)` and reserve `Err`
//! for transient failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::organization::{BillingInfo, RateLimitInfo, TargetOrgPair};

/// Read access to organizations in the system of record.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get_organizations_rate_limit_info(
        &self,
        organization_id: &str,
    ) -> Result<Option<RateLimitInfo>>;

    async fn get_organization_billing(&self, organization_id: &str) -> Result<Option<BillingInfo>>;

    /// Complete set of target ownership pairs.
    async fn get_organizations_target_pairs(&self) -> Result<Vec<TargetOrgPair>>;
}

/// Lock table backing periodic job deduplication.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Inserts `(key, now)`, or refreshes an existing row whose `created_at`
    /// is older than `stale_before`, in one atomic statement.
    ///
    /// Returns true when the row was written (the caller owns the period).
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;

    /// Deletes rows created before `cutoff`, returning the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Operation counts from the columnar store.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Number of operations reported for `targets` since `since`.
    async fn count_operations(&self, targets: &[String], since: DateTime<Utc>) -> Result<u64>;
}
