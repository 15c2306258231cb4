//! Single-attempt delivery of outbound tasks.
//!
//! Each task kind has a payload schema that is validated before anything is
//! sent. With a relay configured, requests are wrapped in a signed envelope
//! and posted to the relay instead of the destination.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, instrument, warn};
use usage_core::limits::DEFAULT_REQUEST_TIMEOUT_SECS;
use usage_core::{Error, Result};
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-relay-signature";
pub const TIMESTAMP_HEADER: &str = "x-relay-timestamp";

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Per-request time budget in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Relay endpoint; when set every request goes through it
    #[serde(default)]
    pub relay_url: Option<String>,
    /// Shared secret for relay envelope signatures
    #[serde(default)]
    pub relay_secret: Option<String>,
    /// Destination of usage limit notices
    #[serde(default)]
    pub notification_url: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            relay_url: None,
            relay_secret: None,
            notification_url: None,
        }
    }
}

/// Kinds of work the dispatcher knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SchemaChangeWebhook,
    UsageLimitNotice,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaChangeWebhook => "schema_change_webhook",
            Self::UsageLimitNotice => "usage_limit_notice",
        }
    }
}

/// Webhook fired after a schema change.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchemaChangeWebhook {
    #[validate(url)]
    pub endpoint: String,
    /// Event body posted verbatim to the endpoint
    pub event: serde_json::Value,
}

/// Notice sent when an organization reaches its monthly operation limit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimitNotice {
    #[validate(length(min = 1))]
    pub organization_id: String,
    pub organization_name: String,
    #[validate(email)]
    pub owner_email: String,
    #[validate(range(min = 1))]
    pub limit: u64,
    pub usage: u64,
    pub period_start: DateTime<Utc>,
}

/// Envelope posted to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayEnvelope {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub kind: TaskKind,
    pub status: u16,
    pub relayed: bool,
    pub latency_ms: u64,
}

#[derive(Debug)]
struct Outbound {
    url: String,
    body: String,
}

/// Hex HMAC-SHA256 of `{timestamp}.{body}` under `secret`.
///
/// The timestamp sent in `x-relay-timestamp` is covered by the signature.
pub fn sign(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::config(format!("Invalid relay secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Executes tasks with a fixed time budget and no retries.
pub struct TaskDispatcher {
    http: reqwest::Client,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        if config.request_timeout_secs == 0 {
            return Err(Error::config("dispatcher request timeout must be greater than 0"));
        }
        Self::with_timeout(config.clone(), Duration::from_secs(config.request_timeout_secs))
    }

    /// Creates a dispatcher with a sub-second budget.
    pub fn with_timeout(config: DispatcherConfig, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::config("dispatcher request timeout must be greater than 0"));
        }
        if config.relay_url.is_some() && config.relay_secret.is_none() {
            return Err(Error::config("relay_url requires relay_secret"));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Validates `payload` for `kind` and delivers it once.
    #[instrument(skip(self, payload), fields(kind = kind.as_str()))]
    pub async fn run(&self, kind: TaskKind, payload: serde_json::Value) -> Result<DeliveryReceipt> {
        let outbound = match kind {
            TaskKind::SchemaChangeWebhook => {
                let webhook: SchemaChangeWebhook = parse(payload)?;
                Outbound {
                    url: webhook.endpoint,
                    body: serde_json::to_string(&webhook.event)
                        .map_err(|e| Error::internal(e.to_string()))?,
                }
            }
            TaskKind::UsageLimitNotice => {
                let notice: UsageLimitNotice = parse(payload)?;
                let url = self
                    .config
                    .notification_url
                    .clone()
                    .ok_or_else(|| Error::config("notification_url is not configured"))?;
                Outbound {
                    url,
                    body: serde_json::to_string(&notice)
                        .map_err(|e| Error::internal(e.to_string()))?,
                }
            }
        };

        let start = Instant::now();
        let result = self.deliver(outbound).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        metrics().delivery_latency_ms.observe(latency_ms);

        match result {
            Ok((status, relayed)) => {
                metrics().deliveries_sent.inc();
                debug!(status, relayed, latency_ms, "Task delivered");
                Ok(DeliveryReceipt {
                    kind,
                    status,
                    relayed,
                    latency_ms,
                })
            }
            Err(e) => {
                metrics().deliveries_failed.inc();
                warn!(error = %e, latency_ms, "Task delivery failed");
                Err(e)
            }
        }
    }

    async fn deliver(&self, outbound: Outbound) -> Result<(u16, bool)> {
        let (target, request) = match (&self.config.relay_url, &self.config.relay_secret) {
            (Some(relay_url), Some(secret)) => {
                let envelope = RelayEnvelope {
                    url: outbound.url,
                    method: "POST".to_string(),
                    headers: BTreeMap::from([(
                        "content-type".to_string(),
                        "application/json".to_string(),
                    )]),
                    body: outbound.body,
                };
                let bytes =
                    serde_json::to_vec(&envelope).map_err(|e| Error::internal(e.to_string()))?;
                let timestamp = Utc::now().timestamp();
                let signature = sign(secret.as_bytes(), timestamp, &bytes)?;

                let request = self
                    .http
                    .post(relay_url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(SIGNATURE_HEADER, signature)
                    .header(TIMESTAMP_HEADER, timestamp.to_string())
                    .body(bytes);
                (relay_url.clone(), request)
            }
            _ => {
                let request = self
                    .http
                    .post(&outbound.url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(outbound.body);
                (outbound.url, request)
            }
        };
        let relayed = self.config.relay_url.is_some();

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::delivery(format!("{} timed out", target))
            } else {
                Error::delivery(format!("{} unreachable: {}", target, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::delivery(format!("{} returned {}", target, status)));
        }

        Ok((status.as_u16(), relayed))
    }
}

fn parse<T: DeserializeOwned + Validate>(payload: serde_json::Value) -> Result<T> {
    let value: T =
        serde_json::from_value(payload).map_err(|e| Error::validation(e.to_string()))?;
    value
        .validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    Ok(value)
}
