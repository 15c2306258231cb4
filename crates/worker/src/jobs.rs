//! Periodic jobs run by the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratelimit::{billing_period_start, AdmissionController};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use usage_core::{Clock, Error, Result};

use crate::dedup::JobDedupGuard;
use crate::dispatcher::{TaskDispatcher, TaskKind, UsageLimitNotice};

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one tick, returning how many items were acted on.
    async fn run(&self) -> Result<u64>;
}

/// Deletes expired dedup rows once per period.
pub struct DedupSweepJob {
    guard: Arc<JobDedupGuard>,
}

impl DedupSweepJob {
    pub fn new(guard: Arc<JobDedupGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Job for DedupSweepJob {
    fn name(&self) -> &'static str {
        "dedup_sweep"
    }

    async fn run(&self) -> Result<u64> {
        match self.guard.run_sweep().await? {
            Some(deleted) => {
                info!(deleted, "Dedup sweep completed");
                Ok(deleted)
            }
            None => Ok(0),
        }
    }
}

/// Notifies organizations that reached their monthly limit, once per
/// billing period each.
pub struct UsageLimitNoticeJob {
    admission: Arc<AdmissionController>,
    guard: Arc<JobDedupGuard>,
    dispatcher: Arc<TaskDispatcher>,
    clock: Arc<dyn Clock>,
}

impl UsageLimitNoticeJob {
    pub fn new(
        admission: Arc<AdmissionController>,
        guard: Arc<JobDedupGuard>,
        dispatcher: Arc<TaskDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admission,
            guard,
            dispatcher,
            clock,
        }
    }

    /// Returns true when a notice was delivered for `organization_id`.
    #[instrument(skip(self, now))]
    async fn check(&self, organization_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let config = self.admission.configs().get(organization_id).await?;
        if config.is_unlimited() {
            return Ok(false);
        }

        let since = billing_period_start(now, config.billing_cycle_day);
        let usage = self.admission.current_usage(organization_id, since).await?;
        if usage < config.limit {
            return Ok(false);
        }

        let notice = UsageLimitNotice {
            organization_id: config.id.clone(),
            organization_name: config.name.clone(),
            owner_email: config.owner_email.clone(),
            limit: config.limit,
            usage,
            period_start: since,
        };
        let payload = serde_json::to_value(&notice).map_err(|e| Error::internal(e.to_string()))?;

        let key = format!(
            "usage-limit-notice:{}:{}",
            organization_id,
            since.format("%Y-%m-%d")
        );
        let delivered = self
            .guard
            .run_once(&key, || {
                self.dispatcher.run(TaskKind::UsageLimitNotice, payload)
            })
            .await?;

        Ok(delivered.is_some())
    }
}

#[async_trait]
impl Job for UsageLimitNoticeJob {
    fn name(&self) -> &'static str {
        "usage_limit_notice"
    }

    async fn run(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut sent = 0;

        for organization_id in self.admission.index().organizations() {
            match self.check(&organization_id, now).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(organization_id = %organization_id, error = %e, "Usage limit check failed")
                }
            }
        }

        if sent > 0 {
            info!(sent, "Usage limit notices delivered");
        }
        Ok(sent)
    }
}
