//! In-process report queue used when no brokers are configured.

use crate::producer::ReportProducer;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use usage_core::{Error, Result};

/// Bounded in-memory stand-in for the report topic.
pub struct MemoryQueue {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Waits up to `timeout` for the first payload, then drains up to `max`.
    pub async fn fetch_batch(&self, max: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => batch.push(payload),
            _ => return batch,
        }

        while batch.len() < max {
            match rx.try_recv() {
                Ok(payload) => batch.push(payload),
                Err(_) => break,
            }
        }
        batch
    }
}

#[async_trait]
impl ReportProducer for MemoryQueue {
    async fn send_report(&self, _key: &str, payload: Vec<u8>) -> Result<()> {
        self.tx
            .try_send(payload)
            .map_err(|e| Error::storage(format!("In-memory report queue: {}", e)))
    }
}
