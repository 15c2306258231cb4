//! Redpanda configuration.

use serde::{Deserialize, Serialize};

/// Redpanda connection and topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses; `["mock"]` keeps reports in process.
    pub brokers: Vec<String>,
    /// Topic carrying compressed usage reports
    #[serde(default = "default_topic")]
    pub topic: String,
    /// SASL username (enables TLS + SCRAM-SHA-256 when set with a password)
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Consumer configuration for the ingestor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Logical consumer name, used in logs
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Maximum number of reports per fetch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum wait for a fetch in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Start from the earliest retained offset instead of the latest
    #[serde(default)]
    pub from_beginning: bool,
}

fn default_topic() -> String {
    "usage-reports".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_group_id() -> String {
    "usage-ingestor".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: default_topic(),
            sasl_username: None,
            sasl_password: None,
            request_timeout_ms: default_request_timeout_ms(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            from_beginning: false,
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn is_mock(&self) -> bool {
        self.brokers.is_empty() || self.brokers.iter().all(|b| b == "mock")
    }
}
