//! In-memory reverse index from target to owning organization.
//!
//! The whole index is an immutable [`IndexSnapshot`] behind an `Arc`. Each
//! reload builds a complete new snapshot and swaps the pointer, so readers
//! see either the old map or the new one and never a mix. Reloads are
//! serialized, so a slow fetch can never publish over a newer one.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use usage_core::store::OrganizationStore;
use usage_core::{Error, Result, TargetOrgPair};

/// One complete generation of the index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    by_target: HashMap<String, String>,
    by_org: HashMap<String, Vec<String>>,
}

impl IndexSnapshot {
    pub fn from_pairs(pairs: Vec<TargetOrgPair>) -> Self {
        let mut by_target = HashMap::with_capacity(pairs.len());
        let mut by_org: HashMap<String, Vec<String>> = HashMap::new();

        for pair in pairs {
            by_org
                .entry(pair.organization.clone())
                .or_default()
                .push(pair.target.clone());
            by_target.insert(pair.target, pair.organization);
        }

        Self { by_target, by_org }
    }

    pub fn lookup(&self, target: &str) -> Option<&str> {
        self.by_target.get(target).map(String::as_str)
    }

    pub fn targets_of(&self, organization_id: &str) -> &[String] {
        self.by_org
            .get(organization_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Organizations owning at least one target.
    pub fn organizations(&self) -> impl Iterator<Item = &str> {
        self.by_org.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

/// Receives the outcome of every reload.
pub trait ReloadObserver: Send + Sync {
    fn on_reloaded(&self, _size: usize) {}

    /// Called when a reload failed; the previous snapshot stays in place.
    fn on_reload_failed(&self, error: &Error);
}

/// Observer that logs reload outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReloadObserver;

impl ReloadObserver for LogReloadObserver {
    fn on_reloaded(&self, size: usize) {
        debug!(targets = size, "Target index reloaded");
    }

    fn on_reload_failed(&self, error: &Error) {
        warn!(error = %error, "Target index reload failed, serving previous snapshot");
    }
}

/// Periodically refreshed target → organization index.
pub struct TargetOrgIndex {
    store: Arc<dyn OrganizationStore>,
    observer: Arc<dyn ReloadObserver>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    /// Held across fetch and swap.
    reload: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TargetOrgIndex {
    pub fn new(store: Arc<dyn OrganizationStore>, observer: Arc<dyn ReloadObserver>) -> Self {
        Self {
            store,
            observer,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            reload: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    /// Creates an index reporting reload outcomes to the log.
    pub fn with_log_observer(store: Arc<dyn OrganizationStore>) -> Self {
        Self::new(store, Arc::new(LogReloadObserver))
    }

    /// Owning organization of `target` in the current snapshot.
    pub fn lookup(&self, target: &str) -> Option<String> {
        self.snapshot.read().lookup(target).map(str::to_string)
    }

    /// Targets owned by `organization_id` in the current snapshot.
    pub fn targets_of(&self, organization_id: &str) -> Vec<String> {
        self.snapshot.read().targets_of(organization_id).to_vec()
    }

    /// Organizations in the current snapshot, sorted.
    pub fn organizations(&self) -> Vec<String> {
        let mut organizations: Vec<String> = self
            .snapshot
            .read()
            .organizations()
            .map(str::to_string)
            .collect();
        organizations.sort();
        organizations
    }

    /// The current snapshot. Stays valid across later swaps.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    /// Loads the index once, then reloads it every `refresh_interval`.
    ///
    /// Fails without scheduling anything when the initial load fails.
    /// Calling `start` again replaces the running timer.
    pub async fn start(self: &Arc<Self>, refresh_interval: Duration) -> Result<()> {
        if refresh_interval.is_zero() {
            return Err(Error::config("target index refresh interval must be greater than 0"));
        }

        let size = self.reset().await?;
        info!(
            targets = size,
            refresh_secs = refresh_interval.as_secs_f64(),
            "Target index loaded"
        );

        let index: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + refresh_interval, refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(index) = index.upgrade() else {
                    break;
                };
                // Failures already went to the observer.
                let _ = index.reset().await;
            }
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Reloads the index now, returning the number of targets loaded.
    ///
    /// On failure the current snapshot is kept. A reload already in flight
    /// finishes first.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<usize> {
        let _reload = self.reload.lock().await;
        let metrics = telemetry::metrics();

        match self.store.get_organizations_target_pairs().await {
            Ok(pairs) => {
                let next = Arc::new(IndexSnapshot::from_pairs(pairs));
                let size = next.len();
                *self.snapshot.write() = next;

                metrics.target_index_reloads.inc();
                metrics.target_index_size.set(size as u64);
                self.observer.on_reloaded(size);
                Ok(size)
            }
            Err(e) => {
                metrics.target_index_reload_errors.inc();
                self.observer.on_reload_failed(&e);
                Err(e)
            }
        }
    }

    /// Cancels the periodic reload. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            debug!("Target index refresh stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TargetOrgIndex {
    fn drop(&mut self) {
        self.stop();
    }
}
