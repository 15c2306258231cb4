//! In-memory storage collaborators.
//!
//! Used for local development (`mock` storage URLs) and tests. Each store
//! counts its reads so callers can assert how often storage was touched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::organization::{BillingInfo, RateLimitInfo, TargetOrgPair};
use crate::store::{DedupStore, OrganizationStore, UsageStore};

/// Organization store backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryOrganizationStore {
    organizations: Mutex<HashMap<String, RateLimitInfo>>,
    billing: Mutex<HashMap<String, BillingInfo>>,
    targets: Mutex<Vec<TargetOrgPair>>,
    rate_limit_reads: AtomicUsize,
    billing_reads: AtomicUsize,
    pair_reads: AtomicUsize,
    read_delay_ms: AtomicU64,
    fail: AtomicBool,
}

impl InMemoryOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_organization(&self, info: RateLimitInfo) {
        self.organizations.lock().insert(info.id.clone(), info);
    }

    pub fn set_billing(&self, organization_id: &str, billing: BillingInfo) {
        self.billing
            .lock()
            .insert(organization_id.to_string(), billing);
    }

    pub fn add_target(&self, target: &str, organization_id: &str) {
        self.targets.lock().push(TargetOrgPair {
            target: target.to_string(),
            organization: organization_id.to_string(),
        });
    }

    /// Replaces the complete target pair set.
    pub fn set_targets(&self, pairs: Vec<TargetOrgPair>) {
        *self.targets.lock() = pairs;
    }

    /// Delays every read, widening race windows in concurrency tests.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes every read fail with a transient storage error.
    pub fn set_should_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn rate_limit_reads(&self) -> usize {
        self.rate_limit_reads.load(Ordering::SeqCst)
    }

    pub fn billing_reads(&self) -> usize {
        self.billing_reads.load(Ordering::SeqCst)
    }

    pub fn pair_reads(&self) -> usize {
        self.pair_reads.load(Ordering::SeqCst)
    }

    async fn before_read(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("in-memory store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl OrganizationStore for InMemoryOrganizationStore {
    async fn get_organizations_rate_limit_info(
        &self,
        organization_id: &str,
    ) -> Result<Option<RateLimitInfo>> {
        self.before_read(&self.rate_limit_reads).await?;
        Ok(self.organizations.lock().get(organization_id).cloned())
    }

    async fn get_organization_billing(&self, organization_id: &str) -> Result<Option<BillingInfo>> {
        self.before_read(&self.billing_reads).await?;
        Ok(self.billing.lock().get(organization_id).cloned())
    }

    async fn get_organizations_target_pairs(&self) -> Result<Vec<TargetOrgPair>> {
        self.before_read(&self.pair_reads).await?;
        Ok(self.targets.lock().clone())
    }
}

/// Dedup lock table; the mutex makes claim a single atomic step.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    rows: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.rows.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.lock();
        match rows.get(key) {
            Some(created_at) if *created_at >= stale_before => Ok(false),
            _ => {
                rows.insert(key.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.rows.lock().remove(key);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, created_at| *created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

/// Usage counts keyed by target; ignores the `since` bound.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    counts: Mutex<HashMap<String, u64>>,
    reads: AtomicUsize,
    fail: AtomicBool,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, target: &str, count: u64) {
        self.counts.lock().insert(target.to_string(), count);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn count_operations(&self, targets: &[String], _since: DateTime<Utc>) -> Result<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("in-memory usage store unavailable"));
        }
        let counts = self.counts.lock();
        Ok(targets.iter().filter_map(|t| counts.get(t)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    #[tokio::test]
    async fn test_dedup_claim_semantics() {
        let store = InMemoryDedupStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let stale_before = now - ChronoDuration::days(30);

        assert!(store.try_claim("job", now, stale_before).await.unwrap());
        assert!(!store.try_claim("job", now, stale_before).await.unwrap());

        let later = now + ChronoDuration::days(31);
        assert!(store
            .try_claim("job", later, later - ChronoDuration::days(30))
            .await
            .unwrap());
        assert_eq!(store.created_at("job"), Some(later));
    }

    #[tokio::test]
    async fn test_failing_store_counts_reads() {
        let store = InMemoryOrganizationStore::new();
        store.set_should_fail(true);
        assert!(store.get_organization_billing("org").await.is_err());
        assert_eq!(store.billing_reads(), 1);
    }
}
