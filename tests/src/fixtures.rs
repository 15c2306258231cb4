//! Report payloads and registry rows for tests.

use serde_json::{json, Value};
use usage_core::RateLimitInfo;

pub const FREE_ORG: &str = "org-free";
pub const FREE_TARGET: &str = "target-free";
pub const CAPPED_ORG: &str = "org-capped";
pub const CAPPED_TARGET: &str = "target-capped";
pub const CAPPED_LIMIT: i64 = 100;

/// A report with `operations` executions of a single document.
pub fn report(id: &str, target: &str, operations: usize) -> Value {
    let ops: Vec<Value> = (0..operations)
        .map(|i| {
            json!({
                "operationMapKey": "op-me",
                "timestamp": 1_700_000_000_000i64 + i as i64,
                "execution": { "ok": true, "duration": 120_000, "errorsTotal": 0 },
                "metadata": { "client": { "name": "web", "version": "2.1.0" } }
            })
        })
        .collect();

    json!({
        "id": id,
        "target": target,
        "size": operations,
        "map": {
            "op-me": {
                "operation": "query Me { me { id name } }",
                "operationName": "Me",
                "fields": ["Query.me", "User.id", "User.name"]
            }
        },
        "operations": ops,
    })
}

pub fn report_json(id: &str, target: &str, operations: usize) -> String {
    report(id, target, operations).to_string()
}

pub fn organization(id: &str, limit: Option<i64>) -> RateLimitInfo {
    RateLimitInfo {
        id: id.to_string(),
        name: format!("{} inc", id),
        clean_id: id.to_string(),
        owner_email: format!("owner@{}.dev", id),
        limit,
        retention_in_days: Some(30),
        plan: "PRO".to_string(),
    }
}

/// Minimal registry schema read by the organization store.
pub const REGISTRY_DDL: &str = r#"
CREATE TABLE users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL
);
CREATE TABLE organizations (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    clean_id TEXT NOT NULL,
    user_id UUID NOT NULL REFERENCES users (id),
    limit_operations_monthly BIGINT,
    limit_retention_days INT,
    plan_name TEXT NOT NULL DEFAULT 'HOBBY'
);
CREATE TABLE organizations_billing (
    organization_id UUID PRIMARY KEY REFERENCES organizations (id),
    billing_day_of_month INT
);
CREATE TABLE projects (
    id UUID PRIMARY KEY,
    org_id UUID NOT NULL REFERENCES organizations (id)
);
CREATE TABLE targets (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES projects (id)
);
"#;

pub const ORG_ID: &str = "6f0a3c9e-1c55-4d5e-9f7c-2a3b4c5d6e7f";
pub const TARGET_ID: &str = "0b8f6c1d-2e3a-4b5c-8d9e-0f1a2b3c4d5e";

/// One user, one organization with billing, one project and one target.
pub const REGISTRY_SEED: &str = r#"
INSERT INTO users (id, email) VALUES ('a1b2c3d4-0000-4000-8000-000000000001', 'owner@acme.dev');
INSERT INTO organizations (id, name, clean_id, user_id, limit_operations_monthly, limit_retention_days, plan_name)
VALUES ('6f0a3c9e-1c55-4d5e-9f7c-2a3b4c5d6e7f', 'Acme', 'acme', 'a1b2c3d4-0000-4000-8000-000000000001', 1000000, 90, 'PRO');
INSERT INTO organizations_billing (organization_id, billing_day_of_month)
VALUES ('6f0a3c9e-1c55-4d5e-9f7c-2a3b4c5d6e7f', 15);
INSERT INTO projects (id, org_id) VALUES ('c0ffee00-0000-4000-8000-000000000002', '6f0a3c9e-1c55-4d5e-9f7c-2a3b4c5d6e7f');
INSERT INTO targets (id, project_id) VALUES ('0b8f6c1d-2e3a-4b5c-8d9e-0f1a2b3c4d5e', 'c0ffee00-0000-4000-8000-000000000002');
"#;
