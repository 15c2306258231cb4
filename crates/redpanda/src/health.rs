//! Redpanda health checks.

use crate::config::RedpandaConfig;
use crate::connect::connect;
use tracing::{debug, error};

/// Check Redpanda connection health.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let client = match connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return false;
        }
    };

    match client.list_topics().await {
        Ok(topics) => {
            let found = topics.iter().any(|t| t.name == config.topic);
            if !found {
                error!(topic = %config.topic, "Redpanda topic missing");
            }
            debug!(topics = topics.len(), "Redpanda connection healthy");
            found
        }
        Err(e) => {
            error!("Failed to list Redpanda topics: {}", e);
            false
        }
    }
}
