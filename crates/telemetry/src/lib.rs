//! Telemetry for usage ingestion: structured logging, in-process metrics
//! and the collaborator health registry.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
