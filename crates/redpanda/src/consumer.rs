//! Redpanda consumer feeding the ingestor.
//!
//! Offsets are tracked in process: after a restart the consumer starts from
//! the latest (or earliest) offset again, depending on configuration.

use crate::config::{ConsumerConfig, RedpandaConfig};
use crate::connect::connect;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use usage_core::limits::MAX_REPORT_SIZE_BYTES;
use usage_core::{Error, Result};

/// Offset tracking for manual commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub partition: i32,
    pub offset: i64,
}

/// Consumer for reading compressed reports from Redpanda.
pub struct Consumer {
    config: RedpandaConfig,
    /// Partition client (currently only partition 0)
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    /// Next offset to read
    current_offset: AtomicI64,
    initialized: AtomicBool,
}

impl Consumer {
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            group_id = %config.consumer.group_id,
            topic = %config.topic,
            batch_size = config.consumer.batch_size,
            "Creating Redpanda consumer"
        );

        Self {
            config,
            partition_client: RwLock::new(None),
            current_offset: AtomicI64::new(-1),
            initialized: AtomicBool::new(false),
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.partition_client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = connect(&self.config).await?;
        let partition_client = client
            .partition_client(self.config.topic.clone(), 0, UnknownTopicHandling::Error)
            .await
            .map_err(|e| Error::storage(format!("Failed to get partition client: {}", e)))?;
        let partition_client = Arc::new(partition_client);

        if !self.initialized.load(Ordering::SeqCst) {
            let at = if self.config.consumer.from_beginning {
                OffsetAt::Earliest
            } else {
                OffsetAt::Latest
            };
            let offset = partition_client
                .get_offset(at)
                .await
                .map_err(|e| Error::storage(format!("Failed to get offset: {}", e)))?;

            self.current_offset.store(offset, Ordering::SeqCst);
            self.initialized.store(true, Ordering::SeqCst);

            info!(
                topic = %self.config.topic,
                partition = 0,
                offset,
                "Consumer initialized at offset"
            );
        }

        *self.partition_client.write().await = Some(partition_client.clone());
        Ok(partition_client)
    }

    /// Fetches a batch of compressed report payloads.
    ///
    /// Returns the payloads and the offset to commit once they are processed.
    pub async fn fetch_batch(&self) -> Result<(Vec<Vec<u8>>, Option<Offset>)> {
        let client = self.ensure_connected().await?;

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.consumer.batch_timeout_ms);
        let max_bytes = (self.config.consumer.batch_size * MAX_REPORT_SIZE_BYTES)
            .min(i32::MAX as usize) as i32;

        let current = self.current_offset.load(Ordering::SeqCst);

        let (records, _watermark) = match client
            .fetch_records(current, 1..max_bytes, timeout.as_millis() as i32)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Fetch error: {}", e);
                self.reset_connection().await;
                return Err(Error::storage(format!("Failed to fetch records: {}", e)));
            }
        };

        if records.is_empty() {
            return Ok((Vec::new(), None));
        }

        let mut max_offset = current;
        let payloads: Vec<Vec<u8>> = records
            .into_iter()
            .filter_map(|record| {
                max_offset = record.offset.max(max_offset);
                record.record.value
            })
            .take(self.config.consumer.batch_size.max(1))
            .collect();

        metrics().reports_consumed.inc_by(payloads.len() as u64);

        debug!(
            reports = payloads.len(),
            offset_start = current,
            offset_end = max_offset,
            latency_ms = %start.elapsed().as_millis(),
            "Fetched batch from Redpanda"
        );

        Ok((
            payloads,
            Some(Offset {
                partition: 0,
                offset: max_offset + 1,
            }),
        ))
    }

    /// Commits an offset after successful processing.
    pub async fn commit(&self, offset: Offset) -> Result<()> {
        let prev = self.current_offset.swap(offset.offset, Ordering::SeqCst);

        debug!(
            partition = offset.partition,
            prev_offset = prev,
            new_offset = offset.offset,
            "Committed offset"
        );
        Ok(())
    }

    /// Returns the current consumer offset.
    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config.consumer
    }

    /// Checks if the consumer is healthy.
    pub async fn health_check(&self) -> bool {
        match self.ensure_connected().await {
            Ok(_) => true,
            Err(e) => {
                error!("Consumer health check failed: {}", e);
                false
            }
        }
    }

    /// Resets the connection (for error recovery).
    pub async fn reset_connection(&self) {
        *self.partition_client.write().await = None;
        info!("Consumer connection reset");
    }
}
