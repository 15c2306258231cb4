//! Tests for the usage report endpoint.
//!
//! Reports go through the real router and admission control; the topic is
//! a `MockProducer` so the produced payloads can be inspected and fed to
//! the ingestor's decoder.

use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use integration_tests::fixtures::{self, CAPPED_LIMIT, CAPPED_TARGET, FREE_TARGET};
use integration_tests::setup::TestContext;
use serde_json::Value;
use usage_core::limits::{MAX_REPORT_SIZE_BYTES, MS_PER_DAY};
use worker::ingestor::decode_report;

fn server(ctx: &TestContext) -> TestServer {
    TestServer::new(ctx.router.clone()).expect("Failed to create test server")
}

#[tokio::test]
async fn test_report_for_known_target_is_accepted() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let response = server
        .post("/usage")
        .json(&fixtures::report("r1", FREE_TARGET, 3))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["id"], "r1");
    assert_eq!(body["operations"], 3);

    assert_eq!(ctx.producer.captured_keys(), [FREE_TARGET]);
    let reports = ctx.producer.captured_reports();
    assert_eq!(reports[0].id, "r1");
    assert_eq!(reports[0].operations.len(), 3);
}

#[tokio::test]
async fn test_missing_report_id_is_assigned() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let response = server
        .post("/usage")
        .json(&fixtures::report("", FREE_TARGET, 1))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    let id = body["id"].as_str().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(ctx.producer.captured_reports()[0].id, id);
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let response = server
        .post("/usage")
        .json(&fixtures::report("r1", "target-nobody-owns", 1))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "ORG_001");
    assert_eq!(ctx.producer.message_count(), 0);
}

#[tokio::test]
async fn test_organization_over_limit_is_rate_limited() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);
    ctx.usage.set_count(CAPPED_TARGET, CAPPED_LIMIT as u64);

    let response = server
        .post("/usage")
        .json(&fixtures::report("r1", CAPPED_TARGET, 1))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json();
    assert_eq!(body["code"], "RATE_001");
    assert_eq!(ctx.producer.message_count(), 0);
}

#[tokio::test]
async fn test_organization_under_limit_is_accepted() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);
    ctx.usage.set_count(CAPPED_TARGET, CAPPED_LIMIT as u64 - 1);

    server
        .post("/usage")
        .json(&fixtures::report("r1", CAPPED_TARGET, 1))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_usage_store_failure_admits_report() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);
    ctx.usage.set_count(CAPPED_TARGET, CAPPED_LIMIT as u64 * 10);
    ctx.usage.set_should_fail(true);

    server
        .post("/usage")
        .json(&fixtures::report("r1", CAPPED_TARGET, 1))
        .await
        .assert_status(StatusCode::ACCEPTED);
    assert_eq!(ctx.producer.message_count(), 1);
}

#[tokio::test]
async fn test_organization_store_failure_is_unavailable() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);
    ctx.organizations.set_should_fail(true);

    let response = server
        .post("/usage")
        .json(&fixtures::report("r1", CAPPED_TARGET, 1))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "DB_001");
}

#[tokio::test]
async fn test_malformed_report_is_rejected() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let response = server
        .post("/usage")
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{\"id\": \"r1\", \"target\":"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "USAGE_001");
    assert!(body["details"].as_array().is_some());
}

#[tokio::test]
async fn test_oversized_report_is_rejected() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let response = server
        .post("/usage")
        .content_type("application/json")
        .bytes(Bytes::from(" ".repeat(MAX_REPORT_SIZE_BYTES + 1)))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "USAGE_001");
}

#[tokio::test]
async fn test_producer_failure_is_unavailable() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);
    ctx.producer.set_should_fail(true);

    let response = server
        .post("/usage")
        .json(&fixtures::report("r1", FREE_TARGET, 1))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "DB_001");
}

/// Produced payloads decode into storage rows the way the ingestor reads them.
#[tokio::test]
async fn test_produced_payload_transcodes() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    server
        .post("/usage")
        .json(&fixtures::report("r1", FREE_TARGET, 4))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let payload = &ctx.producer.captured_payloads()[0];
    let processed = decode_report(payload).expect("payload should transcode");

    assert_eq!(processed.target, FREE_TARGET);
    assert_eq!(processed.operations.len(), 4);
    assert_eq!(processed.registry.len(), 1);
    assert_eq!(processed.registry[0].size, 4);
    assert_eq!(processed.registry[0].name.as_deref(), Some("Me"));
}

#[tokio::test]
async fn test_organization_retention_is_stamped_on_every_operation() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let mut long_retention = fixtures::organization("org-long", None);
    long_retention.retention_in_days = Some(90);
    ctx.organizations.upsert_organization(long_retention);
    ctx.organizations.add_target("target-long", "org-long");
    ctx.admission.index().reset().await.unwrap();

    let mut report = fixtures::report("r1", "target-long", 2);
    let ts = report["operations"][1]["timestamp"].as_i64().unwrap();
    report["operations"][1]["expiresAt"] = (ts + 3650 * MS_PER_DAY).into();

    server
        .post("/usage")
        .json(&report)
        .await
        .assert_status(StatusCode::ACCEPTED);

    let processed = decode_report(&ctx.producer.captured_payloads()[0]).unwrap();
    for op in &processed.operations {
        assert_eq!(op.expires_at - op.timestamp, 90 * MS_PER_DAY);
    }
    assert_eq!(
        processed.registry[0].expires_at - processed.registry[0].timestamp,
        90 * MS_PER_DAY
    );
}

#[tokio::test]
async fn test_dangling_operation_map_key_is_rejected() {
    let ctx = TestContext::new().await;
    let server = server(&ctx);

    let mut report = fixtures::report("r1", FREE_TARGET, 2);
    report["operations"][1]["operationMapKey"] = "nope".into();

    let response = server.post("/usage").json(&report).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "USAGE_001");
    assert!(body["details"][0].as_str().unwrap().contains("nope"));
    assert_eq!(ctx.producer.message_count(), 0);
}
