//! Producer for compressed usage reports.

use crate::config::RedpandaConfig;
use crate::connect::connect;
use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::record::Record;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error};
use usage_core::{Error, Result};

/// Header naming the payload encoding.
pub const CONTENT_ENCODING_HEADER: &str = "content-encoding";

/// Sink for accepted reports.
#[async_trait]
pub trait ReportProducer: Send + Sync {
    /// Publishes one zstd-compressed report, keyed by target.
    async fn send_report(&self, key: &str, payload: Vec<u8>) -> Result<()>;

    /// Checks if the producer can currently publish.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Redpanda producer writing to partition 0 of the report topic.
pub struct Producer {
    config: RedpandaConfig,
    /// Cached partition client, dropped after a failed produce
    client: RwLock<Option<Arc<PartitionClient>>>,
}

impl Producer {
    /// Creates a new producer. The connection is opened on first send.
    pub fn new(config: RedpandaConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    /// Gets or creates the partition client for the report topic.
    async fn get_client(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.client.read().await;
            if let Some(ref client) = *client {
                return Ok(client.clone());
            }
        }

        let client = connect(&self.config).await?;
        let partition_client = client
            .partition_client(self.config.topic.clone(), 0, UnknownTopicHandling::Error)
            .await
            .map_err(|e| Error::storage(format!("Failed to get partition client: {}", e)))?;
        let partition_client = Arc::new(partition_client);

        *self.client.write().await = Some(partition_client.clone());
        Ok(partition_client)
    }

    async fn reset_client(&self) {
        *self.client.write().await = None;
    }
}

#[async_trait]
impl ReportProducer for Producer {
    async fn send_report(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        let client = self.get_client().await?;
        let start = Instant::now();
        let bytes = payload.len();

        let record = Record {
            key: Some(key.as_bytes().to_vec()),
            value: Some(payload),
            headers: BTreeMap::from([(CONTENT_ENCODING_HEADER.to_string(), b"zstd".to_vec())]),
            timestamp: Utc::now(),
        };

        // Payloads are already zstd-compressed.
        if let Err(e) = client.produce(vec![record], Compression::NoCompression).await {
            error!(topic = %self.config.topic, error = %e, "Failed to produce report");
            self.reset_client().await;
            return Err(Error::storage(format!("Failed to produce: {}", e)));
        }

        let elapsed = start.elapsed();
        metrics().ingest_latency_ms.observe(elapsed.as_millis() as u64);

        debug!(
            topic = %self.config.topic,
            key,
            bytes,
            latency_ms = %elapsed.as_millis(),
            "Produced report"
        );
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.get_client().await.is_ok()
    }
}
