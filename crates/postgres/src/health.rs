//! PostgreSQL health checks.

use crate::client::PostgresClient;
use tracing::{debug, error};

/// Check PostgreSQL connection health.
pub async fn check_connection(client: &PostgresClient) -> bool {
    match client.ping().await {
        Ok(()) => {
            debug!("PostgreSQL connection healthy");
            true
        }
        Err(e) => {
            error!("PostgreSQL health check failed: {}", e);
            false
        }
    }
}
