//! Background workers for usage ingestion.
//!
//! - Ingestor (Redpanda → ClickHouse pipeline)
//! - Job deduplication across replicas
//! - Task dispatch (webhooks, usage limit notices)
//! - Periodic jobs and their scheduler

pub mod dedup;
pub mod dispatcher;
pub mod ingestor;
pub mod jobs;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use dedup::{Claim, DedupConfig, DedupPeriod, JobDedupGuard};
pub use dispatcher::{DeliveryReceipt, DispatcherConfig, TaskDispatcher, TaskKind};
pub use ingestor::{
    BatchTable, Ingestor, IngestorConfig, LogWriter, MemorySource, ReportSource, ReportWriter,
};
pub use jobs::{DedupSweepJob, Job, UsageLimitNoticeJob};
pub use scheduler::*;
