//! Usage report endpoint.
//!
//! Admits a raw report against its organization's monthly limit, stamps
//! the organization's retention on every execution, checks that the report
//! transcodes, then hands it compressed to the report topic for the ingestor.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use ratelimit::AdmissionDecision;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, error, info, warn};
use usage_core::{
    compress,
    limits::{MAX_REPORT_OPERATIONS, MAX_REPORT_SIZE_BYTES},
    transcode, RawReport,
};
use uuid::Uuid;

use crate::response::{ApiError, UsageAccepted};
use crate::state::AppState;

/// POST /usage - Report submission from client agents.
pub async fn usage_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UsageAccepted>), ApiError> {
    let start = Instant::now();
    metrics().reports_received.inc();

    let mut report = parse_report(&body).inspect_err(|_| {
        metrics().reports_rejected.inc();
    })?;

    if report.id.is_empty() {
        report.id = Uuid::new_v4().to_string();
    }

    let operations = report.operation_count();
    metrics().operations_received.inc_by(operations as u64);

    debug!(
        report_id = %report.id,
        target_id = %report.target,
        operations,
        payload_size = body.len(),
        "Received usage report"
    );

    let retention_in_days = match state.admission.admit(&report.target).await {
        Ok(AdmissionDecision::Accepted {
            retention_in_days, ..
        }) => retention_in_days,
        Ok(AdmissionDecision::RateLimited {
            organization_id,
            limit,
            usage,
        }) => {
            metrics().reports_rate_limited.inc();
            info!(
                organization_id = %organization_id,
                limit,
                usage,
                "Rejecting report, organization over its monthly limit"
            );
            return Err(ApiError::rate_limited(format!(
                "Organization {} reached its monthly limit of {} operations",
                organization_id, limit
            )));
        }
        Err(e) => {
            metrics().reports_rejected.inc();
            warn!(target_id = %report.target, error = %e, "Report not admitted");
            return Err(e.into());
        }
    };

    report.apply_retention(retention_in_days);
    if let Err(e) = transcode(report.clone()) {
        metrics().reports_rejected.inc();
        warn!(report_id = %report.id, error = %e, "Rejecting report that does not transcode");
        return Err(ApiError::validation(vec![e.to_string()]));
    }

    let payload = serde_json::to_string(&report)
        .map_err(usage_core::Error::from)
        .and_then(|json| compress(&json))
        .map_err(|e| {
            ApiError::with_code(StatusCode::INTERNAL_SERVER_ERROR, "DB_001", e.to_string())
        })?;
    state
        .producer
        .send_report(&report.target, payload)
        .await
        .map_err(|e| {
            error!(report_id = %report.id, error = %e, "Failed to produce report");
            ApiError::from(e)
        })?;

    metrics().reports_accepted.inc();
    let latency_ms = start.elapsed().as_millis() as u64;

    info!(
        report_id = %report.id,
        target_id = %report.target,
        operations,
        latency_ms,
        "Report accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UsageAccepted {
            id: report.id,
            operations,
        }),
    ))
}

fn parse_report(body: &[u8]) -> Result<RawReport, ApiError> {
    if body.len() > MAX_REPORT_SIZE_BYTES {
        return Err(ApiError::validation(vec![format!(
            "Payload size {}KB exceeds {}KB limit",
            body.len() / 1024,
            MAX_REPORT_SIZE_BYTES / 1024
        )]));
    }

    let report: RawReport = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Failed to parse usage report");
        ApiError::validation(vec![e.to_string()])
    })?;

    if report.target.is_empty() {
        return Err(ApiError::validation(vec!["target must not be empty".into()]));
    }

    let operations = report.operation_count();
    if operations > MAX_REPORT_OPERATIONS {
        return Err(ApiError::validation(vec![format!(
            "Report has {} operations, exceeds {} limit",
            operations, MAX_REPORT_OPERATIONS
        )]));
    }

    Ok(report)
}
