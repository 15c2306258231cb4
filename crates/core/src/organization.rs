//! Organization rate-limit configuration.

use serde::{Deserialize, Serialize};

use crate::limits::{DEFAULT_BILLING_CYCLE_DAY, DEFAULT_RETENTION_DAYS, UNLIMITED_OPERATIONS};

/// Rate-limit columns of an organization as stored in the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub id: String,
    pub name: String,
    pub clean_id: String,
    pub owner_email: String,
    /// Monthly operation ceiling; `None` when unset.
    pub limit: Option<i64>,
    pub retention_in_days: Option<i32>,
    pub plan: String,
}

/// Billing settings of an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInfo {
    pub billing_cycle_day: Option<i32>,
}

/// One `target → organization` ownership pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOrgPair {
    pub target: String,
    pub organization: String,
}

/// Cached rate-limit snapshot of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOrganizationConfig {
    pub id: String,
    pub name: String,
    pub clean_id: String,
    pub owner_email: String,
    /// Monthly operation ceiling, `0` = unlimited.
    pub limit: u64,
    pub retention_in_days: u32,
    pub billing_cycle_day: u32,
    pub plan: String,
}

impl RateLimitOrganizationConfig {
    /// Assembles a config from the two storage reads, applying defaults.
    ///
    /// A missing billing record falls back to the default cycle day.
    pub fn assemble(info: RateLimitInfo, billing: Option<BillingInfo>) -> Self {
        let billing_cycle_day = billing
            .and_then(|b| b.billing_cycle_day)
            .and_then(|day| u32::try_from(day).ok())
            .filter(|day| (1..=31).contains(day))
            .unwrap_or(DEFAULT_BILLING_CYCLE_DAY);

        let retention_in_days = info
            .retention_in_days
            .and_then(|days| u32::try_from(days).ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        let limit = info
            .limit
            .and_then(|limit| u64::try_from(limit).ok())
            .unwrap_or(UNLIMITED_OPERATIONS);

        Self {
            id: info.id,
            name: info.name,
            clean_id: info.clean_id,
            owner_email: info.owner_email,
            limit,
            retention_in_days,
            billing_cycle_day,
            plan: info.plan,
        }
    }

    /// Returns true when the organization has no monthly ceiling.
    pub fn is_unlimited(&self) -> bool {
        self.limit == UNLIMITED_OPERATIONS
    }
}
