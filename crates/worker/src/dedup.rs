//! At-most-once execution of periodic jobs.
//!
//! All exclusivity lives in the dedup table: a claim is a single conditional
//! upsert, so the guarantee holds across restarts and concurrent workers.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, error, info, instrument, warn};
use usage_core::limits::DEFAULT_DEDUP_PERIOD_MONTHS;
use usage_core::store::DedupStore;
use usage_core::{Clock, Error, Result};

/// Dedup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Length of one dedup period in calendar months
    #[serde(default = "default_period_months")]
    pub period_months: u32,
}

fn default_period_months() -> u32 {
    DEFAULT_DEDUP_PERIOD_MONTHS
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            period_months: default_period_months(),
        }
    }
}

/// A dedup period measured in calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPeriod {
    months: u32,
}

impl DedupPeriod {
    pub fn months(months: u32) -> Result<Self> {
        if months == 0 {
            return Err(Error::config("dedup period must be at least one month"));
        }
        Ok(Self { months })
    }

    /// Rows created before this instant belong to an earlier period.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Short label of the period containing `now`, e.g. `2024-03`.
    pub fn label(&self, now: DateTime<Utc>) -> String {
        now.format("%Y-%m").to_string()
    }
}

impl Default for DedupPeriod {
    fn default() -> Self {
        Self {
            months: DEFAULT_DEDUP_PERIOD_MONTHS,
        }
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns this period's execution.
    Acquired,
    /// Another run already claimed the key this period.
    AlreadyClaimed,
}

/// Idempotency gate for periodic jobs.
pub struct JobDedupGuard {
    store: Arc<dyn DedupStore>,
    period: DedupPeriod,
    clock: Arc<dyn Clock>,
}

impl JobDedupGuard {
    pub fn new(store: Arc<dyn DedupStore>, period: DedupPeriod, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            period,
            clock,
        }
    }

    pub fn period(&self) -> DedupPeriod {
        self.period
    }

    /// Attempts to claim `key` for the current period.
    #[instrument(skip(self))]
    pub async fn try_claim(&self, key: &str) -> Result<Claim> {
        let now = self.clock.now();
        let claimed = self
            .store
            .try_claim(key, now, self.period.stale_before(now))
            .await?;

        if claimed {
            metrics().dedup_claims.inc();
            debug!(key, "Claimed job key");
            Ok(Claim::Acquired)
        } else {
            metrics().dedup_claims_skipped.inc();
            debug!(key, "Job key already claimed this period");
            Ok(Claim::AlreadyClaimed)
        }
    }

    /// Returns true when the caller now owns `key` for this period.
    pub async fn claim(&self, key: &str) -> Result<bool> {
        Ok(self.try_claim(key).await? == Claim::Acquired)
    }

    /// Deletes the claim so a retry in the same period can claim again.
    #[instrument(skip(self))]
    pub async fn release(&self, key: &str) -> Result<()> {
        self.store.release(key).await
    }

    /// Deletes claims older than one period, returning how many were removed.
    pub async fn sweep(&self) -> Result<u64> {
        let cutoff = self.period.stale_before(self.clock.now());
        let deleted = self.store.delete_older_than(cutoff).await?;
        info!(deleted, cutoff = %cutoff, "Swept stale job keys");
        Ok(deleted)
    }

    /// Runs `job` if `key` can be claimed; releases the claim when it fails.
    ///
    /// Returns `Ok(None)` when the key was already claimed this period.
    pub async fn run_once<F, Fut, T>(&self, key: &str, job: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.try_claim(key).await? == Claim::AlreadyClaimed {
            return Ok(None);
        }

        match job().await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Claimed job failed, releasing claim");
                if let Err(release_err) = self.release(key).await {
                    error!(key, error = %release_err, "Failed to release job claim");
                }
                Err(e)
            }
        }
    }

    /// Sweeps stale claims, at most once per period across all workers.
    pub async fn run_sweep(&self) -> Result<Option<u64>> {
        let key = format!("sweep:{}", self.period.label(self.clock.now()));
        self.run_once(&key, || self.sweep()).await
    }
}
