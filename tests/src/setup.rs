//! Common test setup functions.

use api::{router, AppState};
use axum::Router;
use ratelimit::{AdmissionController, ConfigCache, ConfigCacheSettings, TargetOrgIndex};
use std::sync::Arc;
use std::time::Duration;
use usage_core::memory::{InMemoryOrganizationStore, InMemoryUsageStore};
use usage_core::SystemClock;

use crate::fixtures::{self, CAPPED_LIMIT, CAPPED_ORG, CAPPED_TARGET, FREE_ORG, FREE_TARGET};
use crate::mocks::MockProducer;

/// Test context with in-memory stores behind the real router.
///
/// - `org-free` (unlimited) owns `target-free`
/// - `org-capped` (limit 100) owns `target-capped`
pub struct TestContext {
    pub organizations: Arc<InMemoryOrganizationStore>,
    pub usage: Arc<InMemoryUsageStore>,
    pub producer: Arc<MockProducer>,
    pub admission: Arc<AdmissionController>,
    pub router: Router,
}

impl TestContext {
    pub async fn new() -> Self {
        let organizations = Arc::new(InMemoryOrganizationStore::new());
        organizations.upsert_organization(fixtures::organization(FREE_ORG, None));
        organizations.upsert_organization(fixtures::organization(CAPPED_ORG, Some(CAPPED_LIMIT)));
        organizations.add_target(FREE_TARGET, FREE_ORG);
        organizations.add_target(CAPPED_TARGET, CAPPED_ORG);

        let usage = Arc::new(InMemoryUsageStore::new());
        let producer = Arc::new(MockProducer::new());

        let index = Arc::new(TargetOrgIndex::with_log_observer(organizations.clone()));
        index.reset().await.expect("index should load");

        let configs = ConfigCache::new(organizations.clone(), ConfigCacheSettings::default())
            .expect("valid cache settings");
        let admission = Arc::new(AdmissionController::with_usage_ttl(
            index,
            configs,
            usage.clone(),
            Arc::new(SystemClock),
            Duration::from_millis(1),
        ));

        let state = AppState::new(producer.clone(), admission.clone());

        Self {
            organizations,
            usage,
            producer,
            admission,
            router: router(state),
        }
    }
}
