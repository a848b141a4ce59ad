//! Metrics definitions for the Class Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 2 values (coordinator, session)
//! - `kind`: bounded by `ProviderEventKind` (~10 values)
//! - `outcome`/`status`: bounded by code paths (2-4 values)
//! - `error_type`: bounded by `CcError::metric_label`
//! - `role`: 2 values (coach, student)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle for
/// serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Roster queries hit the vendor SDK; budget is the reconcile interval.
        .set_buckets_for_metric(
            Matcher::Prefix("cc_roster_query".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.000],
        )
        .map_err(|e| format!("Failed to set roster query buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("cc_store".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("cc_switchover".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set switchover buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session Metrics (Gauges)
// ============================================================================

/// Set the number of sessions known to the coordinator.
///
/// Metric: `cc_sessions_active`
/// Labels: `status` (waiting, active, ended)
pub fn set_sessions_active(status: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_sessions_active", "status" => status.to_string()).set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `cc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Participant State Metrics (Counters)
// ============================================================================

/// Record a provider event entering the session actor.
///
/// Metric: `cc_provider_events_total`
/// Labels: `kind`
pub fn record_provider_event(kind: &str) {
    counter!("cc_provider_events_total", "kind" => kind.to_string()).increment(1);
}

/// Record a payload the normalizer could not read.
///
/// Metric: `cc_payload_unrecognized_total`
/// Labels: `payload_kind` (null, bool, number, string, array, object)
pub fn record_payload_unrecognized(payload_kind: &str) {
    counter!("cc_payload_unrecognized_total", "payload_kind" => payload_kind.to_string())
        .increment(1);
}

/// Record a reconciliation pass.
///
/// Metrics: `cc_reconciliation_total` (labels: `outcome`),
/// `cc_reconciliation_corrections_total` (labels: `direction`)
///
/// Corrections count participants recovered from missed `joined` events
/// and participants dropped for missed `left` events.
pub fn record_reconciliation(outcome: &str, recovered_joins: usize, recovered_leaves: usize) {
    counter!("cc_reconciliation_total", "outcome" => outcome.to_string()).increment(1);
    if recovered_joins > 0 {
        counter!("cc_reconciliation_corrections_total", "direction" => "joined")
            .increment(recovered_joins as u64);
    }
    if recovered_leaves > 0 {
        counter!("cc_reconciliation_corrections_total", "direction" => "left")
            .increment(recovered_leaves as u64);
    }
}

/// Record roster query latency.
///
/// Metric: `cc_roster_query_duration_seconds`
pub fn record_roster_query_latency(duration: Duration) {
    histogram!("cc_roster_query_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Coordination Metrics
// ============================================================================

/// Record a join attempt outcome.
///
/// Metric: `cc_join_attempts_total`
/// Labels: `role`, `outcome` (success or a `CcError::metric_label`)
pub fn record_join_outcome(role: &str, outcome: &str) {
    counter!(
        "cc_join_attempts_total",
        "role" => role.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a provider switchover.
///
/// Metrics: `cc_switchover_total` (labels: `status`),
/// `cc_switchover_duration_seconds`
pub fn record_switchover(status: &str, duration: Duration) {
    counter!("cc_switchover_total", "status" => status.to_string()).increment(1);
    histogram!("cc_switchover_duration_seconds").record(duration.as_secs_f64());
}

/// Record sessions evicted from the registry by the cleanup task.
///
/// Metric: `cc_registry_evictions_total`
/// Labels: `reason` (expired, ended)
pub fn record_registry_evictions(reason: &str, count: usize) {
    counter!("cc_registry_evictions_total", "reason" => reason.to_string())
        .increment(count as u64);
}

/// Record key-value store latency.
///
/// Metric: `cc_store_latency_seconds`
/// Labels: `operation` (get, set, delete, list_keys)
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("cc_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record an actor panic.
///
/// Metric: `cc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("cc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record an error by operation and type.
///
/// Metric: `cc_errors_total`
/// Labels: `operation`, `error_type`, `status_code`
pub fn record_error(operation: &str, error_type: &str, status_code: i32) {
    counter!(
        "cc_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_sessions_active("active", 3);
        set_actor_mailbox_depth("session", 7);
        record_provider_event("joined");
        record_payload_unrecognized("object");
        record_reconciliation("success", 2, 1);
        record_roster_query_latency(Duration::from_millis(15));
        record_join_outcome("student", "session_not_ready");
        record_switchover("success", Duration::from_millis(400));
        record_registry_evictions("expired", 4);
        record_store_latency("get", Duration::from_micros(300));
        record_actor_panic("coordinator");
        record_error("join", "capacity_exceeded", 7);
    }

    #[test]
    fn test_metrics_captured_by_debugging_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_provider_event("video-on");
            record_reconciliation("success", 1, 0);
            record_reconciliation("query_failed", 0, 0);
            set_sessions_active("waiting", 1);
            record_join_outcome("coach", "success");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        assert!(names.contains(&"cc_provider_events_total".to_string()));
        assert!(names.contains(&"cc_reconciliation_total".to_string()));
        assert!(names.contains(&"cc_reconciliation_corrections_total".to_string()));
        assert!(names.contains(&"cc_sessions_active".to_string()));
        assert!(names.contains(&"cc_join_attempts_total".to_string()));
    }
}
