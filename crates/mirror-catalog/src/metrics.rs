//! Catalog metrics.
//!
//! Counters and histograms for refresh runs, entity changes, and snapshots.
//! These complement the per-change log lines. Without an installed recorder
//! every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::model::EntityKind;
use crate::reconcile::StageReport;

// ============================================================================
// Refresh Metrics
// ============================================================================

/// Completed refresh runs, labelled by outcome.
pub const REFRESH_TOTAL: &str = "mirror_refresh_total";

/// Triggers rejected because a run was already in flight.
pub const REFRESH_REJECTED: &str = "mirror_refresh_rejected_total";

/// Refresh run duration histogram.
pub const REFRESH_DURATION: &str = "mirror_refresh_duration_seconds";

// ============================================================================
// Entity Metrics
// ============================================================================

/// Entity changes, labelled by kind and action.
pub const ENTITY_CHANGES: &str = "mirror_entity_changes_total";

/// Table CAS retry counter.
pub const CAS_RETRY: &str = "mirror_cas_retry_total";

// ============================================================================
// Snapshot Metrics
// ============================================================================

/// Snapshot operations, labelled by op (`created`, `already_exists`).
pub const SNAPSHOT_OPERATIONS: &str = "mirror_snapshot_operations_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all catalog metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(REFRESH_TOTAL, "Total refresh runs by outcome");
    describe_counter!(REFRESH_REJECTED, "Total refresh triggers rejected while running");
    describe_histogram!(REFRESH_DURATION, "Duration of refresh runs in seconds");
    describe_counter!(ENTITY_CHANGES, "Total catalog entity changes by kind and action");
    describe_counter!(CAS_RETRY, "Total table CAS retry attempts");
    describe_counter!(SNAPSHOT_OPERATIONS, "Total commit snapshot operations");
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records a finished refresh run.
pub fn record_refresh(outcome: &str, duration_secs: f64) {
    counter!(REFRESH_TOTAL, "outcome" => outcome.to_string()).increment(1);
    histogram!(REFRESH_DURATION, "outcome" => outcome.to_string()).record(duration_secs);
}

/// Records a rejected trigger.
pub fn record_refresh_rejected() {
    counter!(REFRESH_REJECTED).increment(1);
}

/// Records the changes committed by one stage.
pub fn record_entity_changes(report: &StageReport) {
    let kind = report.kind.as_str();
    for (action, count) in report.counts() {
        if count > 0 {
            let labels = [("kind", kind.to_string()), ("action", action.to_string())];
            counter!(ENTITY_CHANGES, &labels).increment(count);
        }
    }
}

/// Records a CAS retry on a table write.
pub fn record_cas_retry(kind: EntityKind) {
    counter!(CAS_RETRY, "kind" => kind.as_str()).increment(1);
}

/// Records a snapshot operation.
pub fn record_snapshot_operation(op: &'static str) {
    counter!(SNAPSHOT_OPERATIONS, "op" => op).increment(1);
}
