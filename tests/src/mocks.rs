//! Mock implementations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use redpanda::ReportProducer;
use std::sync::Arc;
use usage_core::{decompress, Error, RawReport, Result};

/// Mock producer that captures payloads in memory.
///
/// Implements the same `ReportProducer` trait as the real `Producer`, so
/// tests see the exact bytes that would be sent to the topic.
#[derive(Clone, Default)]
pub struct MockProducer {
    /// `(key, payload)` of every report sent through this producer.
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    /// Simulate failures if set.
    should_fail: Arc<Mutex<bool>>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw compressed payloads in send order.
    pub fn captured_payloads(&self) -> Vec<Vec<u8>> {
        self.messages.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn captured_keys(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Captured payloads decompressed back into reports.
    pub fn captured_reports(&self) -> Vec<RawReport> {
        self.messages
            .lock()
            .iter()
            .map(|(_, payload)| {
                let json = decompress(payload).expect("payload should be zstd");
                serde_json::from_str(&json).expect("payload should be a report")
            })
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }
}

#[async_trait]
impl ReportProducer for MockProducer {
    async fn send_report(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        if *self.should_fail.lock() {
            return Err(Error::storage("Mock producer failure"));
        }
        self.messages.lock().push((key.to_string(), payload));
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !*self.should_fail.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usage_core::compress;

    #[tokio::test]
    async fn test_mock_producer_captures_reports() {
        let mock = MockProducer::new();
        let json = crate::fixtures::report_json("r1", "target-1", 2);
        mock.send_report("target-1", compress(&json).unwrap())
            .await
            .unwrap();

        assert_eq!(mock.message_count(), 1);
        assert_eq!(mock.captured_keys(), ["target-1"]);
        assert_eq!(mock.captured_reports()[0].operations.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_producer_failure_mode() {
        let mock = MockProducer::new();
        mock.set_should_fail(true);

        assert!(mock.send_report("t", vec![]).await.is_err());
        assert!(!mock.is_healthy().await);
        assert_eq!(mock.message_count(), 0);
    }
}
