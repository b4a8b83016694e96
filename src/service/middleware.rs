//! Service middleware and metric events.
//!
//! Metrics are emitted as structured log events under the
//! `social_graph::metrics` target so they can be aggregated from logs:
//!
//! - `request` - path, method, status and latency per request
//! - `sync` - outcome of each follow/unfollow
//! - `reconcile` - counts from each on-demand sweep
//! - `recommendation` - result size and latency

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::reconcile::ReconcileReport;
use crate::sync::{EdgeOp, SyncError, SyncOutcome};
use crate::types::UserId;

/// Metrics middleware that records request counts and latency.
///
/// Uses the matched route pattern rather than the raw URI to keep
/// cardinality bounded.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "social_graph::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Label for a sync result.
fn sync_result_label(result: &Result<SyncOutcome, SyncError>) -> &'static str {
    match result {
        Ok(SyncOutcome::Applied) => "applied",
        Ok(SyncOutcome::PendingReconciliation(_)) => "pending_reconciliation",
        Err(SyncError::InvalidEdge(_)) => "invalid_edge",
        Err(SyncError::SyncFailed { .. }) => "sync_failed",
    }
}

/// Record the outcome of a follow or unfollow.
pub fn record_sync_outcome(op: EdgeOp, result: &Result<SyncOutcome, SyncError>) {
    info!(
        target: "social_graph::metrics",
        metric_type = "sync",
        op = %op,
        result = sync_result_label(result),
        "sync_metric"
    );
}

/// Record a reconciliation sweep.
pub fn record_reconcile(report: &ReconcileReport, full: bool) {
    info!(
        target: "social_graph::metrics",
        metric_type = "reconcile",
        full = full,
        examined = report.examined,
        added = report.added,
        removed = report.removed,
        failed = report.failed,
        "reconcile_metric"
    );
}

/// Record a recommendation request.
pub fn record_recommendation(user: UserId, count: usize, latency_ms: u64) {
    info!(
        target: "social_graph::metrics",
        metric_type = "recommendation",
        user_id = %user,
        count = count,
        latency_ms = latency_ms,
        "recommendation_metric"
    );
}
