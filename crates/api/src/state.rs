//! Application state shared across handlers.

use ratelimit::AdmissionController;
use redpanda::ReportProducer;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Report producer (Redpanda in production, in-memory queue or mock otherwise)
    pub producer: Arc<dyn ReportProducer>,
    /// Admission control for incoming reports
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    pub fn new(producer: Arc<dyn ReportProducer>, admission: Arc<AdmissionController>) -> Self {
        Self {
            producer,
            admission,
        }
    }
}
