//! Organization reads against the registry schema.

use crate::client::{storage_error, PostgresClient};
use async_trait::async_trait;
use tracing::{debug, instrument};
use usage_core::store::OrganizationStore;
use usage_core::{BillingInfo, RateLimitInfo, Result, TargetOrgPair};

const RATE_LIMIT_INFO: &str = r#"
SELECT
    o.id::text                  AS id,
    o.name                      AS name,
    o.clean_id                  AS clean_id,
    u.email                     AS owner_email,
    o.limit_operations_monthly  AS limit_operations_monthly,
    o.limit_retention_days      AS limit_retention_days,
    o.plan_name                 AS plan_name
FROM organizations o
JOIN users u ON u.id = o.user_id
WHERE o.id::text = $1
"#;

const BILLING: &str = r#"
SELECT billing_day_of_month
FROM organizations_billing
WHERE organization_id::text = $1
"#;

const TARGET_PAIRS: &str = r#"
SELECT
    t.id::text      AS target,
    p.org_id::text  AS organization
FROM targets t
JOIN projects p ON p.id = t.project_id
"#;

/// PostgreSQL implementation of [`OrganizationStore`].
#[derive(Clone)]
pub struct PostgresOrganizationStore {
    client: PostgresClient,
}

impl PostgresOrganizationStore {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrganizationStore for PostgresOrganizationStore {
    #[instrument(skip(self))]
    async fn get_organizations_rate_limit_info(
        &self,
        organization_id: &str,
    ) -> Result<Option<RateLimitInfo>> {
        let conn = self.client.get_connection().await?;

        let row = conn
            .query_opt(RATE_LIMIT_INFO, &[&organization_id])
            .await
            .map_err(storage_error)?;

        Ok(row.map(|row| RateLimitInfo {
            id: row.get("id"),
            name: row.get("name"),
            clean_id: row.get("clean_id"),
            owner_email: row.get("owner_email"),
            limit: row.get("limit_operations_monthly"),
            retention_in_days: row.get("limit_retention_days"),
            plan: row.get("plan_name"),
        }))
    }

    #[instrument(skip(self))]
    async fn get_organization_billing(&self, organization_id: &str) -> Result<Option<BillingInfo>> {
        let conn = self.client.get_connection().await?;

        let row = conn
            .query_opt(BILLING, &[&organization_id])
            .await
            .map_err(storage_error)?;

        Ok(row.map(|row| BillingInfo {
            billing_cycle_day: row.get("billing_day_of_month"),
        }))
    }

    #[instrument(skip(self))]
    async fn get_organizations_target_pairs(&self) -> Result<Vec<TargetOrgPair>> {
        let conn = self.client.get_connection().await?;

        let rows = conn.query(TARGET_PAIRS, &[]).await.map_err(storage_error)?;

        debug!(pairs = rows.len(), "Loaded target pairs");

        Ok(rows
            .into_iter()
            .map(|row| TargetOrgPair {
                target: row.get("target"),
                organization: row.get("organization"),
            })
            .collect())
    }
}
