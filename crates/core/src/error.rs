//! Unified error types for usage ingestion.
//!
//! Error codes surfaced to clients:
//! - USAGE_001: Malformed report / validation
//! - ORG_001: Unknown target or organization
//! - RATE_001: Organization over its monthly limit
//! - DB_001: Storage or transport failure

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured transcoding failure. A single failure rejects the whole report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscodeError {
    #[error("report {report_id}: operation map key `{key}` not found")]
    MissingMapKey { report_id: String, key: String },

    #[error("report {report_id}: timestamp {timestamp} out of range")]
    InvalidTimestamp { report_id: String, timestamp: i64 },
}

/// Unified error type.
///
/// Cloneable so a single failed cache fill can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Organization or target absent in storage. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed raw report.
    #[error("transcoding error: {0}")]
    Transcoding(#[from] TranscodeError),

    /// Timeout or connection failure against a storage collaborator.
    #[error("storage error: {0}")]
    TransientStorage(String),

    /// Outbound delivery failed (transport, timeout or non-2xx status).
    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::TransientStorage(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ORG_001",
            Self::Transcoding(_) | Self::Validation(_) | Self::Compression(_) => "USAGE_001",
            Self::RateLimited(_) => "RATE_001",
            Self::TransientStorage(_) | Self::Delivery(_) | Self::Config(_) | Self::Internal(_) => {
                "DB_001"
            }
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Transcoding(_) | Self::Validation(_) | Self::Compression(_) => 400,
            Self::RateLimited(_) => 429,
            Self::TransientStorage(_) | Self::Delivery(_) => 503,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether a later attempt may succeed without any change to the input.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage(_) | Self::Delivery(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::not_found("org").code(), "ORG_001");
        assert_eq!(Error::RateLimited("x".into()).code(), "RATE_001");
        assert_eq!(Error::storage("down").code(), "DB_001");
        let err: Error = TranscodeError::MissingMapKey {
            report_id: "r1".into(),
            key: "k1".into(),
        }
        .into();
        assert_eq!(err.code(), "USAGE_001");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_transcode_error_names_key() {
        let err = TranscodeError::MissingMapKey {
            report_id: "r1".into(),
            key: "abc".into(),
        };
        assert!(err.to_string().contains("`abc`"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::storage("timeout").is_transient());
        assert!(Error::delivery("502").is_transient());
        assert!(!Error::not_found("org").is_transient());
    }
}
