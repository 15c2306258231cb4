//! Defaults and size limits for usage ingestion.
//!
//! Every value here is a documented default; the hot path never invents its
//! own fallbacks.

// === Organization defaults ===

/// Retention applied when the organization has no explicit retention.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Milliseconds in one retention day.
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Billing cycle day applied when the organization has no billing record.
pub const DEFAULT_BILLING_CYCLE_DAY: u32 = 1;

/// Monthly operation limit sentinel meaning "unlimited".
pub const UNLIMITED_OPERATIONS: u64 = 0;

// === Report limits ===

/// Maximum raw report payload size in bytes (8MB).
pub const MAX_REPORT_SIZE_BYTES: usize = 8 * 1024 * 1024;

/// Maximum operations (plus subscription operations) per report.
pub const MAX_REPORT_OPERATIONS: usize = 100_000;

// === Cache defaults ===

/// Default organization config cache capacity.
pub const DEFAULT_CONFIG_CACHE_CAPACITY: u64 = 1_000;

/// Default organization config TTL (seconds).
pub const DEFAULT_CONFIG_CACHE_TTL_SECS: u64 = 60;

/// Default target index refresh interval (seconds).
pub const DEFAULT_TARGET_INDEX_REFRESH_SECS: u64 = 30;

/// Default TTL for cached monthly usage counts (seconds).
pub const DEFAULT_USAGE_CACHE_TTL_SECS: u64 = 60;

// === Jobs ===

/// Default dedup period length in calendar months.
pub const DEFAULT_DEDUP_PERIOD_MONTHS: u32 = 1;

/// Default outbound request timeout (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
