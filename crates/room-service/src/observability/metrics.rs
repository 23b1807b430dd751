//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded; room and participant IDs never appear as labels.
//! - `operation`: store and bus call names (~6 values)
//! - `outcome`: counted, rejected, failed
//! - `reason`: credential rejection causes (~9 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Backend calls are bounded at a few seconds; most should be sub-10ms
        .set_buckets_for_metric(
            Matcher::Prefix("room_backend".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set backend latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection Metrics (Gauges)
// ============================================================================

/// Set the number of open WebSocket connections on this process.
///
/// Metric: `room_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_connections_active").set(count as f64);
}

// ============================================================================
// Vote Metrics (Counters)
// ============================================================================

/// Record a vote attempt.
///
/// Metric: `room_votes_total`
/// Labels: `outcome` (counted, rejected, failed)
pub fn record_vote(outcome: &'static str) {
    counter!("room_votes_total", "outcome" => outcome).increment(1);
}

/// Record a room reaching its majority.
///
/// Metric: `room_triggers_total`
///
/// Incremented only by the process that persisted the transition.
pub fn record_trigger() {
    counter!("room_triggers_total").increment(1);
}

// ============================================================================
// Backend Metrics
// ============================================================================

/// Record a store or bus call latency.
///
/// Metric: `room_backend_latency_seconds`
/// Labels: `operation`
pub fn record_backend_latency(operation: &'static str, duration: Duration) {
    histogram!("room_backend_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record a failed or timed-out store or bus call.
///
/// Metric: `room_backend_errors_total`
/// Labels: `operation`
pub fn record_backend_error(operation: &'static str) {
    counter!("room_backend_errors_total", "operation" => operation).increment(1);
}

/// Record a fanout publish that could not be delivered to the bus.
///
/// Metric: `room_fanout_publish_failures_total`
///
/// Failed publishes are not retried; a sustained rate means peers are
/// showing stale room state.
pub fn record_publish_failure() {
    counter!("room_fanout_publish_failures_total").increment(1);
}

// ============================================================================
// Credential Metrics
// ============================================================================

/// Record a rejected connection credential.
///
/// Metric: `room_credential_rejections_total`
/// Labels: `reason` (see `CredentialError::reason`)
pub fn record_credential_rejection(reason: &'static str) {
    counter!("room_credential_rejections_total", "reason" => reason).increment(1);
}
