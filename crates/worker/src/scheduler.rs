//! Worker scheduler for the ingestor and periodic jobs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use usage_core::{Error, Result};

use crate::ingestor::Ingestor;
use crate::jobs::Job;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dedup sweep interval in seconds
    #[serde(default = "default_dedup_sweep_interval_secs")]
    pub dedup_sweep_interval_secs: u64,
    /// Usage limit notice check interval in seconds
    #[serde(default = "default_usage_notice_interval_secs")]
    pub usage_notice_interval_secs: u64,
    /// Metrics log interval in seconds
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
}

fn default_dedup_sweep_interval_secs() -> u64 {
    3600
}

fn default_usage_notice_interval_secs() -> u64 {
    300
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dedup_sweep_interval_secs: default_dedup_sweep_interval_secs(),
            usage_notice_interval_secs: default_usage_notice_interval_secs(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_interval_secs)
    }

    pub fn usage_notice_interval(&self) -> Duration {
        Duration::from_secs(self.usage_notice_interval_secs)
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_log_interval_secs)
    }
}

/// Background worker scheduler.
///
/// Owns the task handles it spawns; `stop` aborts all of them.
pub struct WorkerScheduler {
    metrics_interval: Duration,
    ingestor: Option<Arc<Ingestor>>,
    jobs: Vec<(Arc<dyn Job>, Duration)>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            metrics_interval: config.metrics_log_interval(),
            ingestor: None,
            jobs: Vec::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ingestor(mut self, ingestor: Arc<Ingestor>) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    pub fn with_job(mut self, job: Arc<dyn Job>, every: Duration) -> Self {
        self.jobs.push((job, every));
        self
    }

    /// Spawns the ingestor, every job loop and the metrics log loop.
    ///
    /// Starting a running scheduler does nothing.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.metrics_interval.is_zero() {
            return Err(Error::config("metrics log interval must be greater than 0"));
        }
        if let Some((job, _)) = self.jobs.iter().find(|(_, every)| every.is_zero()) {
            return Err(Error::config(format!(
                "interval of job {} must be greater than 0",
                job.name()
            )));
        }

        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Worker scheduler already running");
            return Ok(());
        }

        if let Some(ref ingestor) = self.ingestor {
            let ingestor = ingestor.clone();
            handles.push(tokio::spawn(async move {
                ingestor.run().await;
            }));
            info!("Ingestor started");
        }

        for (job, every) in &self.jobs {
            let job = job.clone();
            let every = *every;
            handles.push(tokio::spawn(async move {
                run_job(job, every).await;
            }));
        }

        let every = self.metrics_interval;
        handles.push(tokio::spawn(async move {
            run_metrics_log(every).await;
        }));

        info!(jobs = self.jobs.len(), "Background workers started");
        Ok(())
    }

    /// Aborts every spawned task. Idempotent.
    pub fn stop(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        info!(tasks = handles.len(), "Background workers stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_job(job: Arc<dyn Job>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(job = job.name(), every_secs = every.as_secs(), "Job scheduled");

    loop {
        ticker.tick().await;

        match job.run().await {
            Ok(count) => debug!(job = job.name(), count, "Job tick finished"),
            Err(e) => error!(job = job.name(), error = %e, "Job failed"),
        }
    }
}

async fn run_metrics_log(every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = metrics().snapshot();
        info!(
            reports_received = snapshot.reports_received,
            reports_accepted = snapshot.reports_accepted,
            reports_rate_limited = snapshot.reports_rate_limited,
            reports_consumed = snapshot.reports_consumed,
            transcoding_failures = snapshot.transcoding_failures,
            operations_written = snapshot.operations_written,
            config_cache_hits = snapshot.config_cache_hits,
            config_cache_misses = snapshot.config_cache_misses,
            target_index_size = snapshot.target_index_size,
            deliveries_sent = snapshot.deliveries_sent,
            deliveries_failed = snapshot.deliveries_failed,
            "Metrics"
        );
    }
}
