//! Admission control for usage ingestion.
//!
//! Answers "which organization owns this target" and "may that organization
//! keep ingesting" without putting the system of record on the hot path.

pub mod admission;
pub mod config_cache;
pub mod target_index;

pub use admission::{billing_period_start, AdmissionController, AdmissionDecision};
pub use config_cache::{ConfigCache, ConfigCacheSettings};
pub use target_index::{IndexSnapshot, LogReloadObserver, ReloadObserver, TargetOrgIndex};
