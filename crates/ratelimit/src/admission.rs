//! Admission decision for incoming usage reports.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use usage_core::limits::DEFAULT_USAGE_CACHE_TTL_SECS;
use usage_core::store::UsageStore;
use usage_core::{Clock, Error, Result};

use crate::config_cache::ConfigCache;
use crate::target_index::TargetOrgIndex;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Accepted {
        organization_id: String,
        /// Days every accepted row is kept in the columnar store.
        retention_in_days: u32,
        /// Operations counted this billing period; `None` when unlimited or
        /// when the usage store could not be read.
        usage: Option<u64>,
    },
    RateLimited {
        organization_id: String,
        limit: u64,
        usage: u64,
    },
}

impl AdmissionDecision {
    pub fn organization_id(&self) -> &str {
        match self {
            Self::Accepted {
                organization_id, ..
            }
            | Self::RateLimited {
                organization_id, ..
            } => organization_id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Start of the billing period containing `now`, at midnight UTC.
///
/// A cycle day past the end of a short month lands on that month's last day.
pub fn billing_period_start(now: DateTime<Utc>, billing_cycle_day: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let month_start = today - Days::new(u64::from(today.day0()));

    let this_cycle = cycle_date(month_start, billing_cycle_day);
    let start = if this_cycle <= today {
        this_cycle
    } else {
        let previous = month_start
            .checked_sub_months(Months::new(1))
            .unwrap_or(month_start);
        cycle_date(previous, billing_cycle_day)
    };

    start.and_time(NaiveTime::MIN).and_utc()
}

fn cycle_date(month_start: NaiveDate, billing_cycle_day: u32) -> NaiveDate {
    let last_day = month_start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28);
    let day = billing_cycle_day.clamp(1, last_day);
    month_start.with_day(day).unwrap_or(month_start)
}

/// Decides whether a target's organization may keep ingesting.
pub struct AdmissionController {
    index: Arc<TargetOrgIndex>,
    configs: ConfigCache,
    usage: Arc<dyn UsageStore>,
    usage_cache: Cache<String, u64>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    pub fn new(
        index: Arc<TargetOrgIndex>,
        configs: ConfigCache,
        usage: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_usage_ttl(
            index,
            configs,
            usage,
            clock,
            Duration::from_secs(DEFAULT_USAGE_CACHE_TTL_SECS),
        )
    }

    pub fn with_usage_ttl(
        index: Arc<TargetOrgIndex>,
        configs: ConfigCache,
        usage: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        usage_ttl: Duration,
    ) -> Self {
        Self {
            index,
            configs,
            usage,
            usage_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(usage_ttl)
                .build(),
            clock,
        }
    }

    pub fn index(&self) -> &Arc<TargetOrgIndex> {
        &self.index
    }

    pub fn configs(&self) -> &ConfigCache {
        &self.configs
    }

    /// Checks a report for `target`.
    ///
    /// Unknown targets and organizations are `NotFound`. An organization at or
    /// over its monthly limit is `RateLimited`. A failing usage store admits
    /// the report.
    #[instrument(skip(self))]
    pub async fn admit(&self, target: &str) -> Result<AdmissionDecision> {
        let organization_id = self
            .index
            .lookup(target)
            .ok_or_else(|| Error::not_found(format!("target {}", target)))?;

        let config = self.configs.get(&organization_id).await?;
        if config.is_unlimited() {
            return Ok(AdmissionDecision::Accepted {
                organization_id,
                retention_in_days: config.retention_in_days,
                usage: None,
            });
        }

        let since = billing_period_start(self.clock.now(), config.billing_cycle_day);
        let usage = match self.current_usage(&organization_id, since).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Usage lookup failed, admitting report"
                );
                return Ok(AdmissionDecision::Accepted {
                    organization_id,
                    retention_in_days: config.retention_in_days,
                    usage: None,
                });
            }
        };

        if usage >= config.limit {
            debug!(
                organization_id = %organization_id,
                usage,
                limit = config.limit,
                "Organization over monthly limit"
            );
            return Ok(AdmissionDecision::RateLimited {
                organization_id,
                limit: config.limit,
                usage,
            });
        }

        Ok(AdmissionDecision::Accepted {
            organization_id,
            retention_in_days: config.retention_in_days,
            usage: Some(usage),
        })
    }

    /// Operations reported by every target of the organization since `since`.
    pub async fn current_usage(&self, organization_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let key = format!("{}:{}", organization_id, since.timestamp());
        let targets = self.index.targets_of(organization_id);
        let usage = Arc::clone(&self.usage);

        self.usage_cache
            .try_get_with(key, async move { usage.count_operations(&targets, since).await })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }
}
