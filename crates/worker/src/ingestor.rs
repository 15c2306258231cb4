//! Report ingestor: compressed reports from the topic into ClickHouse.
//!
//! Each batch is fetched, decoded, written with retries and only then
//! committed, so a crash replays the batch (at-least-once).

use async_trait::async_trait;
use clickhouse_client::insert::{insert_operations, insert_registry, insert_subscription_operations};
use clickhouse_client::schema::{
    OPERATIONS_TABLE, OPERATION_COLLECTION_TABLE, SUBSCRIPTION_OPERATIONS_TABLE,
};
use clickhouse_client::ClickHouseClient;
use redpanda::{Consumer, MemoryQueue, Offset};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, error, info, warn};
use usage_core::{
    decompress, transcode, Error, ProcessedOperation, ProcessedRegistryRecord, ProcessedReport,
    ProcessedSubscriptionOperation, RawReport, Result,
};

/// Where compressed reports come from.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Next batch of payloads and the offset to commit once they are stored.
    async fn fetch_batch(&self) -> Result<(Vec<Vec<u8>>, Option<Offset>)>;

    async fn commit(&self, offset: Offset) -> Result<()>;

    /// Drops any cached connection after a failed batch.
    async fn reset(&self) {}
}

#[async_trait]
impl ReportSource for Consumer {
    async fn fetch_batch(&self) -> Result<(Vec<Vec<u8>>, Option<Offset>)> {
        Consumer::fetch_batch(self).await
    }

    async fn commit(&self, offset: Offset) -> Result<()> {
        Consumer::commit(self, offset).await
    }

    async fn reset(&self) {
        self.reset_connection().await;
    }
}

/// Reads from an in-process queue; there is nothing to commit.
pub struct MemorySource {
    queue: Arc<MemoryQueue>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl MemorySource {
    pub fn new(queue: Arc<MemoryQueue>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            queue,
            batch_size,
            batch_timeout,
        }
    }
}

#[async_trait]
impl ReportSource for MemorySource {
    async fn fetch_batch(&self) -> Result<(Vec<Vec<u8>>, Option<Offset>)> {
        let payloads = self
            .queue
            .fetch_batch(self.batch_size, self.batch_timeout)
            .await;
        Ok((payloads, None))
    }

    async fn commit(&self, _offset: Offset) -> Result<()> {
        Ok(())
    }
}

/// Rows of one or more transcoded reports, grouped by table.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub operations: Vec<ProcessedOperation>,
    pub subscription_operations: Vec<ProcessedSubscriptionOperation>,
    pub registry: Vec<ProcessedRegistryRecord>,
}

impl WriteBatch {
    pub fn push(&mut self, report: ProcessedReport) {
        self.operations.extend(report.operations);
        self.subscription_operations
            .extend(report.subscription_operations);
        self.registry.extend(report.registry);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
            && self.subscription_operations.is_empty()
            && self.registry.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.operations.len() + self.subscription_operations.len() + self.registry.len()
    }
}

/// Target table of one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTable {
    Operations,
    SubscriptionOperations,
    Registry,
}

impl BatchTable {
    /// Insert order within a batch.
    pub const ALL: [BatchTable; 3] = [
        BatchTable::Operations,
        BatchTable::SubscriptionOperations,
        BatchTable::Registry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operations => OPERATIONS_TABLE,
            Self::SubscriptionOperations => SUBSCRIPTION_OPERATIONS_TABLE,
            Self::Registry => OPERATION_COLLECTION_TABLE,
        }
    }
}

impl WriteBatch {
    pub fn rows_for(&self, table: BatchTable) -> usize {
        match table {
            BatchTable::Operations => self.operations.len(),
            BatchTable::SubscriptionOperations => self.subscription_operations.len(),
            BatchTable::Registry => self.registry.len(),
        }
    }
}

/// Where transcoded rows go, one table per call.
///
/// Tables are written separately so a retry only repeats the inserts that
/// actually failed.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write(&self, table: BatchTable, batch: &WriteBatch) -> Result<()>;
}

#[async_trait]
impl ReportWriter for ClickHouseClient {
    async fn write(&self, table: BatchTable, batch: &WriteBatch) -> Result<()> {
        let rows = match table {
            BatchTable::Operations => insert_operations(self, &batch.operations).await?,
            BatchTable::SubscriptionOperations => {
                insert_subscription_operations(self, &batch.subscription_operations).await?
            }
            BatchTable::Registry => insert_registry(self, &batch.registry).await?,
        };
        debug!(table = table.as_str(), rows, "Inserted rows");
        Ok(())
    }
}

/// Logs and drops rows; used when no ClickHouse is configured.
pub struct LogWriter;

#[async_trait]
impl ReportWriter for LogWriter {
    async fn write(&self, table: BatchTable, batch: &WriteBatch) -> Result<()> {
        debug!(
            table = table.as_str(),
            rows = batch.rows_for(table),
            "Discarding rows, no columnar store configured"
        );
        Ok(())
    }
}

/// Ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Maximum retries for write failures
    pub max_retries: u32,
    /// Backoff between retries, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Whether to commit and move on when a batch cannot be written
    pub skip_on_failure: bool,
    /// Registry rows remembered as written
    pub registry_cache_capacity: u64,
    /// How long a written registry row is skipped for
    pub registry_cache_ttl: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            skip_on_failure: true,
            registry_cache_capacity: 100_000,
            registry_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Decompresses, parses and transcodes one message payload.
pub fn decode_report(payload: &[u8]) -> Result<ProcessedReport> {
    let json = decompress(payload)?;
    let report: RawReport = serde_json::from_str(&json)
        .map_err(|e| Error::validation(format!("Malformed report: {}", e)))?;
    Ok(transcode(report)?)
}

fn registry_key(record: &ProcessedRegistryRecord) -> String {
    format!("{}:{}", record.target, record.hash)
}

/// Consumes reports and writes them to the columnar store.
pub struct Ingestor {
    source: Arc<dyn ReportSource>,
    writer: Arc<dyn ReportWriter>,
    config: IngestorConfig,
    registry_seen: moka::sync::Cache<String, ()>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn ReportSource>, writer: Arc<dyn ReportWriter>) -> Self {
        Self::with_config(source, writer, IngestorConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn ReportSource>,
        writer: Arc<dyn ReportWriter>,
        config: IngestorConfig,
    ) -> Self {
        let registry_seen = moka::sync::Cache::builder()
            .max_capacity(config.registry_cache_capacity)
            .time_to_live(config.registry_cache_ttl)
            .build();

        Self {
            source,
            writer,
            config,
            registry_seen,
        }
    }

    /// Main loop: fetch, write, commit. Runs until the task is aborted.
    pub async fn run(&self) {
        info!(
            max_retries = self.config.max_retries,
            skip_on_failure = self.config.skip_on_failure,
            "Ingestor starting"
        );

        loop {
            match self.process_batch().await {
                Ok(count) => {
                    if count > 0 {
                        debug!(count, "Processed batch");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Batch processing error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    self.source.reset().await;
                }
            }
        }
    }

    /// Processes a single batch, returning the number of rows written.
    pub async fn process_batch(&self) -> Result<usize> {
        let (payloads, offset) = self.source.fetch_batch().await?;
        if payloads.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        metrics().reports_consumed.inc_by(payloads.len() as u64);

        let mut batch = WriteBatch::default();
        for payload in &payloads {
            match decode_report(payload) {
                Ok(report) => batch.push(report),
                Err(e) => {
                    metrics().transcoding_failures.inc();
                    warn!(error = %e, bytes = payload.len(), "Dropping undecodable report");
                }
            }
        }

        batch
            .registry
            .retain(|record| !self.registry_seen.contains_key(&registry_key(record)));

        if batch.is_empty() {
            if let Some(offset) = offset {
                self.source.commit(offset).await?;
            }
            return Ok(0);
        }

        match self.write_with_retry(&batch).await {
            Ok(()) => {
                for record in &batch.registry {
                    self.registry_seen.insert(registry_key(record), ());
                }
                metrics()
                    .registry_records_written
                    .inc_by(batch.registry.len() as u64);

                if let Some(offset) = offset {
                    self.source.commit(offset).await?;
                }
                metrics()
                    .ingest_latency_ms
                    .observe(start.elapsed().as_millis() as u64);
                Ok(batch.row_count())
            }
            Err(e) => {
                error!(
                    reports = payloads.len(),
                    rows = batch.row_count(),
                    error = %e,
                    "Failed to write batch after retries"
                );

                if self.config.skip_on_failure {
                    warn!("Skipping failed batch, committing offset");
                    if let Some(offset) = offset {
                        self.source.commit(offset).await?;
                    }
                    Ok(0)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Writes every non-empty table, retrying only the tables still pending.
    async fn write_with_retry(&self, batch: &WriteBatch) -> Result<()> {
        let mut pending: Vec<BatchTable> = BatchTable::ALL
            .into_iter()
            .filter(|table| batch.rows_for(*table) > 0)
            .collect();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * attempt;
                warn!(
                    attempt,
                    backoff_ms = %backoff.as_millis(),
                    pending = pending.len(),
                    "Retrying batch write"
                );
                tokio::time::sleep(backoff).await;
            }

            while let Some(&table) = pending.first() {
                match self.writer.write(table, batch).await {
                    Ok(()) => {
                        pending.remove(0);
                    }
                    Err(e) => {
                        warn!(table = table.as_str(), error = %e, "Table insert failed");
                        last_error = Some(e);
                        break;
                    }
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
        }

        Err(last_error.unwrap_or_else(|| Error::internal("Write failed with unknown error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use redpanda::ReportProducer;
    use std::sync::atomic::{AtomicU32, Ordering};
    use usage_core::compress;

    /// Records `(table, rows)` of every successful insert.
    #[derive(Default)]
    struct RecordingWriter {
        inserts: Mutex<Vec<(BatchTable, usize)>>,
        failures_left: AtomicU32,
        fail_only: Option<BatchTable>,
    }

    impl RecordingWriter {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn failing_on(table: BatchTable, times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                fail_only: Some(table),
                ..Default::default()
            }
        }

        fn rows(&self, table: BatchTable) -> Vec<usize> {
            self.inserts
                .lock()
                .iter()
                .filter(|(t, _)| *t == table)
                .map(|(_, rows)| *rows)
                .collect()
        }
    }

    #[async_trait]
    impl ReportWriter for RecordingWriter {
        async fn write(&self, table: BatchTable, batch: &WriteBatch) -> Result<()> {
            let targeted = self.fail_only.map_or(true, |only| only == table);
            let left = self.failures_left.load(Ordering::SeqCst);
            if targeted && left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::storage("clickhouse unavailable"));
            }
            self.inserts.lock().push((table, batch.rows_for(table)));
            Ok(())
        }
    }

    fn report(id: &str, map_key: &str) -> Vec<u8> {
        let json = format!(
            r#"{{
                "id": "{id}",
                "target": "target-1",
                "size": 2,
                "map": {{"abc": {{"operation": "query Me {{ me {{ id }} }}", "operationName": "Me", "fields": ["Query.me"]}}}},
                "operations": [
                    {{"operationMapKey": "{map_key}", "timestamp": 1700000000000, "execution": {{"ok": true, "duration": 1000, "errorsTotal": 0}}}},
                    {{"operationMapKey": "abc", "timestamp": 1700000001000, "execution": {{"ok": false, "duration": 2000, "errorsTotal": 1}}}}
                ]
            }}"#
        );
        compress(&json).unwrap()
    }

    fn config() -> IngestorConfig {
        IngestorConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn setup(writer: Arc<RecordingWriter>, config: IngestorConfig) -> (Arc<MemoryQueue>, Ingestor) {
        let queue = Arc::new(MemoryQueue::new(16));
        let source = MemorySource::new(queue.clone(), 10, Duration::from_millis(20));
        let ingestor = Ingestor::with_config(Arc::new(source), writer, config);
        (queue, ingestor)
    }

    #[test]
    fn test_decode_report() {
        let processed = decode_report(&report("r1", "abc")).unwrap();
        assert_eq!(processed.operations.len(), 2);
        assert_eq!(processed.registry.len(), 1);
        assert_eq!(processed.registry[0].size, 2);

        assert!(matches!(decode_report(b"not zstd"), Err(Error::Compression(_))));
        assert!(matches!(
            decode_report(&compress("{}").unwrap()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            decode_report(&report("r2", "missing")),
            Err(Error::Transcoding(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_written_and_registry_skipped_next_time() {
        let writer = Arc::new(RecordingWriter::default());
        let (queue, ingestor) = setup(writer.clone(), config()).await;

        queue.send_report("r1", report("r1", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 3);

        queue.send_report("r2", report("r2", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 2);

        assert_eq!(writer.rows(BatchTable::Operations), [2, 2]);
        assert_eq!(writer.rows(BatchTable::Registry), [1]);
        assert!(writer.rows(BatchTable::SubscriptionOperations).is_empty());
    }

    #[tokio::test]
    async fn test_bad_reports_do_not_block_good_ones() {
        let writer = Arc::new(RecordingWriter::default());
        let (queue, ingestor) = setup(writer.clone(), config()).await;

        queue.send_report("bad", b"garbage".to_vec()).await.unwrap();
        queue.send_report("dangling", report("d", "missing")).await.unwrap();
        queue.send_report("good", report("g", "abc")).await.unwrap();

        assert_eq!(ingestor.process_batch().await.unwrap(), 3);
        assert_eq!(writer.rows(BatchTable::Operations), [2]);
        assert_eq!(writer.rows(BatchTable::Registry), [1]);
    }

    #[tokio::test]
    async fn test_empty_fetch_writes_nothing() {
        let writer = Arc::new(RecordingWriter::default());
        let (_queue, ingestor) = setup(writer.clone(), config()).await;

        assert_eq!(ingestor.process_batch().await.unwrap(), 0);
        assert!(writer.inserts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let writer = Arc::new(RecordingWriter::failing(2));
        let (queue, ingestor) = setup(writer.clone(), config()).await;

        queue.send_report("r1", report("r1", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 3);
        assert_eq!(writer.rows(BatchTable::Operations), [2]);
        assert_eq!(writer.rows(BatchTable::Registry), [1]);
    }

    #[tokio::test]
    async fn test_retry_repeats_only_failed_table() {
        let writer = Arc::new(RecordingWriter::failing_on(BatchTable::Registry, 2));
        let (queue, ingestor) = setup(writer.clone(), config()).await;

        queue.send_report("r1", report("r1", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 3);

        assert_eq!(writer.rows(BatchTable::Operations), [2]);
        assert_eq!(writer.rows(BatchTable::Registry), [1]);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_registry_unmarked() {
        let writer = Arc::new(RecordingWriter::failing(4));
        let (queue, ingestor) = setup(
            writer.clone(),
            IngestorConfig {
                skip_on_failure: false,
                ..config()
            },
        )
        .await;

        queue.send_report("r1", report("r1", "abc")).await.unwrap();
        let err = ingestor.process_batch().await.unwrap_err();
        assert!(matches!(err, Error::TransientStorage(_)));

        queue.send_report("r2", report("r2", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 3);
        assert_eq!(writer.rows(BatchTable::Registry), [1]);
    }

    #[tokio::test]
    async fn test_skip_on_failure_drops_batch() {
        let writer = Arc::new(RecordingWriter::failing(10));
        let (queue, ingestor) = setup(writer.clone(), config()).await;

        queue.send_report("r1", report("r1", "abc")).await.unwrap();
        assert_eq!(ingestor.process_batch().await.unwrap(), 0);
        assert!(writer.inserts.lock().is_empty());
    }
}
