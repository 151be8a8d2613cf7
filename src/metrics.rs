// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the migration engine.
//!
//! Components receive an `Arc<dyn MetricsSink>` at construction so several
//! engines (one per resource type) can live in one process. [`MetricsRecorder`]
//! emits through the `metrics` crate; the parent service chooses the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `dualwrite_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: legacy, unified
//! - `method`: create, update, delete, delete_collection, get, list
//! - `outcome`: success, error, match, mismatch
//! - `resource_type`, `policy`

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

use crate::policy::Store;

/// Destination for the engine's signals.
pub trait MetricsSink: Send + Sync {
    /// One store call made on behalf of a routed write.
    fn record_write(&self, store: Store, method: &str, resource_type: &str, success: bool, duration: Duration);

    /// Result of comparing the authoritative read with the other store.
    fn record_read_comparison(&self, resource_type: &str, method: &str, matched: bool);

    /// A compensating delete after a strict secondary failure.
    fn record_rollback(&self, resource_type: &str, success: bool);

    /// One reconciliation pass.
    fn record_sync_pass(&self, resource_type: &str, policy: &str, synced: bool, duration: Duration);

    /// One healed item (`action` is `upsert` or `delete`).
    fn record_sync_item(&self, resource_type: &str, policy: &str, action: &str, success: bool);
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// [`MetricsSink`] backed by the `metrics` crate facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsRecorder;

impl MetricsSink for MetricsRecorder {
    fn record_write(&self, store: Store, method: &str, resource_type: &str, success: bool, duration: Duration) {
        histogram!(
            "dualwrite_write_seconds",
            "store" => store.as_str(),
            "method" => method.to_string(),
            "resource_type" => resource_type.to_string(),
            "outcome" => outcome(success)
        )
        .record(duration.as_secs_f64());
    }

    fn record_read_comparison(&self, resource_type: &str, method: &str, matched: bool) {
        counter!(
            "dualwrite_read_comparison_total",
            "resource_type" => resource_type.to_string(),
            "method" => method.to_string(),
            "outcome" => if matched { "match" } else { "mismatch" }
        )
        .increment(1);
    }

    fn record_rollback(&self, resource_type: &str, success: bool) {
        counter!(
            "dualwrite_rollback_total",
            "resource_type" => resource_type.to_string(),
            "outcome" => outcome(success)
        )
        .increment(1);
    }

    fn record_sync_pass(&self, resource_type: &str, policy: &str, synced: bool, duration: Duration) {
        histogram!(
            "dualwrite_syncer_pass_seconds",
            "resource_type" => resource_type.to_string(),
            "policy" => policy.to_string()
        )
        .record(duration.as_secs_f64());
        counter!(
            "dualwrite_syncer_pass_total",
            "resource_type" => resource_type.to_string(),
            "policy" => policy.to_string(),
            "outcome" => if synced { "synced" } else { "unsynced" }
        )
        .increment(1);
    }

    fn record_sync_item(&self, resource_type: &str, policy: &str, action: &str, success: bool) {
        counter!(
            "dualwrite_syncer_items_total",
            "resource_type" => resource_type.to_string(),
            "policy" => policy.to_string(),
            "action" => action.to_string(),
            "outcome" => outcome(success)
        )
        .increment(1);
    }
}

/// Drops every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_write(&self, _: Store, _: &str, _: &str, _: bool, _: Duration) {}
    fn record_read_comparison(&self, _: &str, _: &str, _: bool) {}
    fn record_rollback(&self, _: &str, _: bool) {}
    fn record_sync_pass(&self, _: &str, _: &str, _: bool, _: Duration) {}
    fn record_sync_item(&self, _: &str, _: &str, _: &str, _: bool) {}
}

/// Measures one store call.
pub(crate) struct WriteTimer {
    start: Instant,
}

impl WriteTimer {
    pub(crate) fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
