// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the kingress controller.
//!
//! All metrics carry the namespace prefix `kingress`.
//!
//! # Metrics Categories
//!
//! - **Cycle Metrics** - Reconcile cycles, their outcome and duration
//! - **Sync Metrics** - Admin API operations per entity kind, action and result
//! - **Graph Metrics** - Size of the desired graph and of each changeset
//! - **Source Metrics** - Per-object outcomes, problems and status write failures
//!
//! # Example
//!
//! ```rust,no_run
//! use kingress::metrics::{record_cycle, gather_metrics};
//!
//! record_cycle("success", std::time::Duration::from_millis(120));
//! let text = gather_metrics().unwrap();
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all kingress metrics
const METRICS_NAMESPACE: &str = "kingress";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Cycle Metrics
// ============================================================================

/// Total number of reconcile cycles by result
///
/// Labels:
/// - `result`: `success`, `partial` (some operations failed) or `error` (aborted)
pub static CYCLES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_cycles_total"),
        "Total number of reconcile cycles by result",
    );
    let counter = CounterVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconcile cycles in seconds
pub static CYCLE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_cycle_duration_seconds"),
        "Duration of reconcile cycles in seconds by result",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]);
    let histogram = HistogramVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Times the applied-configuration cache was dropped
///
/// Labels:
/// - `reason`: `ambiguous_outcome`
pub static CACHE_INVALIDATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_applied_cache_invalidations_total"),
        "Times the applied gateway configuration had to be re-read",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Sync Metrics
// ============================================================================

/// Admin API operations by entity kind, action and result
///
/// Labels:
/// - `entity_kind`: gateway entity kind (`route`, `service`, ...)
/// - `action`: `create`, `update`, `delete`
/// - `result`: `applied`, `failed`, `skipped`
pub static OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_operations_total"),
        "Admin API operations by entity kind, action and result",
    );
    let counter = CounterVec::new(opts, &["entity_kind", "action", "result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Admin API retries by entity kind
pub static OPERATION_RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_operation_retries_total"),
        "Admin API operation retries after transient errors by entity kind",
    );
    let counter = CounterVec::new(opts, &["entity_kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Graph Metrics
// ============================================================================

/// Operations in the most recent changeset by action
pub static CHANGESET_OPERATIONS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_changeset_operations"),
        "Operations in the most recent changeset by action",
    );
    let gauge = GaugeVec::new(opts, &["action"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Entities in the desired graph by kind
pub static DESIRED_ENTITIES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_desired_entities"),
        "Entities in the most recent desired graph by kind",
    );
    let gauge = GaugeVec::new(opts, &["entity_kind"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Source Metrics
// ============================================================================

/// Source objects by kind and outcome after the most recent cycle
///
/// Labels:
/// - `source_kind`: `Ingress`, `TCPIngress`, ...
/// - `outcome`: `Ready`, `Conflicting`, `Invalid`, `SyncFailed`
pub static SOURCE_OUTCOMES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_source_outcomes"),
        "Source objects by kind and outcome after the most recent cycle",
    );
    let gauge = GaugeVec::new(opts, &["source_kind", "outcome"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Status writes that failed
pub static STATUS_WRITE_ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_status_write_errors_total"),
        "Failed status patches and event publications by source kind",
    );
    let counter = CounterVec::new(opts, &["source_kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Record a finished reconcile cycle
///
/// # Arguments
/// * `result` - `success`, `partial` or `error`
/// * `duration` - Wall time of the cycle
pub fn record_cycle(result: &str, duration: Duration) {
    CYCLES_TOTAL.with_label_values(&[result]).inc();
    CYCLE_DURATION_SECONDS
        .with_label_values(&[result])
        .observe(duration.as_secs_f64());
}

/// Record a dropped applied-configuration cache
pub fn record_cache_invalidation(reason: &str) {
    CACHE_INVALIDATIONS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record the final result of an admin API operation
pub fn record_operation(entity_kind: &str, action: &str, result: &str) {
    OPERATIONS_TOTAL
        .with_label_values(&[entity_kind, action, result])
        .inc();
}

/// Record a retry after a transient admin API error
pub fn record_operation_retry(entity_kind: &str) {
    OPERATION_RETRIES_TOTAL
        .with_label_values(&[entity_kind])
        .inc();
}

/// Record the size of a changeset
#[allow(clippy::cast_precision_loss)]
pub fn record_changeset(creates: usize, updates: usize, deletes: usize) {
    for (action, count) in [("create", creates), ("update", updates), ("delete", deletes)] {
        CHANGESET_OPERATIONS
            .with_label_values(&[action])
            .set(count as f64);
    }
}

/// Record the number of desired entities of one kind
#[allow(clippy::cast_precision_loss)]
pub fn set_desired_entities(entity_kind: &str, count: usize) {
    DESIRED_ENTITIES
        .with_label_values(&[entity_kind])
        .set(count as f64);
}

/// Record the number of source objects of one kind with one outcome
#[allow(clippy::cast_precision_loss)]
pub fn set_source_outcomes(source_kind: &str, outcome: &str, count: usize) {
    SOURCE_OUTCOMES
        .with_label_values(&[source_kind, outcome])
        .set(count as f64);
}

/// Record a failed status write
pub fn record_status_write_error(source_kind: &str) {
    STATUS_WRITE_ERRORS_TOTAL
        .with_label_values(&[source_kind])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
