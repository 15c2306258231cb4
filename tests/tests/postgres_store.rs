//! PostgreSQL store tests.
//!
//! Require Docker (or `USAGE_TEST_POSTGRES_HOST`); run with
//! `cargo test -p integration-tests -- --ignored`.

use chrono::{Duration, TimeZone, Utc};
use integration_tests::containers::TestPostgres;
use integration_tests::fixtures::{ORG_ID, REGISTRY_DDL, REGISTRY_SEED, TARGET_ID};
use postgres_store::{migrations, PostgresClient, PostgresDedupStore, PostgresOrganizationStore};
use ratelimit::{ConfigCache, ConfigCacheSettings};
use std::sync::Arc;
use usage_core::store::{DedupStore, OrganizationStore};
use usage_core::ManualClock;
use worker::{DedupPeriod, JobDedupGuard};

async fn client(pg: &TestPostgres) -> PostgresClient {
    let client = PostgresClient::new(&pg.config).expect("pool should build");
    migrations::run(&client).await.expect("migrations should apply");
    client
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claim_is_exclusive_within_period() {
    let pg = TestPostgres::start().await;
    let store = Arc::new(PostgresDedupStore::new(client(&pg).await));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap(),
    ));
    let guard = JobDedupGuard::new(store.clone(), DedupPeriod::default(), clock.clone());

    assert!(guard.claim("usage-limit-notice:acme").await.unwrap());
    assert!(!guard.claim("usage-limit-notice:acme").await.unwrap());

    clock.advance(Duration::days(40));
    assert!(guard.claim("usage-limit-notice:acme").await.unwrap());

    guard.release("usage-limit-notice:acme").await.unwrap();
    assert!(guard.claim("usage-limit-notice:acme").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_claims_have_one_winner() {
    let pg = TestPostgres::start().await;
    let store = Arc::new(PostgresDedupStore::new(client(&pg).await));
    let now = Utc::now();

    let claims = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .try_claim("sweep:race", now, now - Duration::days(30))
                .await
                .unwrap()
        })
    });

    let mut winners = 0;
    for claim in claims.collect::<Vec<_>>() {
        if claim.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sweep_deletes_rows_older_than_cutoff() {
    let pg = TestPostgres::start().await;
    let store = PostgresDedupStore::new(client(&pg).await);
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    store
        .try_claim("old", now - Duration::days(60), now - Duration::days(90))
        .await
        .unwrap();
    store.try_claim("fresh", now, now - Duration::days(30)).await.unwrap();

    assert_eq!(store.delete_older_than(now - Duration::days(30)).await.unwrap(), 1);
    assert!(!store.try_claim("fresh", now, now - Duration::days(30)).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_organization_reads() {
    let pg = TestPostgres::start().await;
    let client = client(&pg).await;
    {
        let conn = client.get_connection().await.unwrap();
        conn.batch_execute(REGISTRY_DDL).await.unwrap();
        conn.batch_execute(REGISTRY_SEED).await.unwrap();
    }
    let store = Arc::new(PostgresOrganizationStore::new(client));

    let info = store
        .get_organizations_rate_limit_info(ORG_ID)
        .await
        .unwrap()
        .expect("organization should exist");
    assert_eq!(info.owner_email, "owner@acme.dev");
    assert_eq!(info.limit, Some(1_000_000));

    let billing = store.get_organization_billing(ORG_ID).await.unwrap().unwrap();
    assert_eq!(billing.billing_cycle_day, Some(15));

    let pairs = store.get_organizations_target_pairs().await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].target, TARGET_ID);
    assert_eq!(pairs[0].organization, ORG_ID);

    let missing = "00000000-0000-4000-8000-000000000000";
    assert!(store
        .get_organizations_rate_limit_info(missing)
        .await
        .unwrap()
        .is_none());

    let cache = ConfigCache::new(store, ConfigCacheSettings::default()).unwrap();
    let config = cache.get(ORG_ID).await.unwrap();
    assert_eq!(config.limit, 1_000_000);
    assert_eq!(config.retention_in_days, 90);
    assert_eq!(config.billing_cycle_day, 15);
}
