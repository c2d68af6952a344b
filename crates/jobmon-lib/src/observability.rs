//! Observability infrastructure for the job monitoring service
//!
//! Provides:
//! - Prometheus metrics (cache efficiency, load routing, background task runs)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for background run durations (in seconds)
const RUN_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_evictions: IntCounter,
    cache_resident_bytes: IntGauge,
    cache_entries: IntGauge,
    metric_loads: IntCounterVec,
    metric_load_errors: IntCounterVec,
    footprint_run_seconds: Histogram,
    footprint_jobs_updated: IntCounter,
    footprint_jobs_skipped: IntCounter,
    retention_jobs_removed: IntCounterVec,
    retention_inconsistencies: IntCounter,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            cache_hits: register_int_counter!(
                "jobmon_cache_hits_total",
                "Live metric requests answered from the cache"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_counter!(
                "jobmon_cache_misses_total",
                "Live metric requests that went to the backend"
            )
            .expect("Failed to register cache_misses"),

            cache_evictions: register_int_counter!(
                "jobmon_cache_evictions_total",
                "Cache entries evicted under capacity pressure"
            )
            .expect("Failed to register cache_evictions"),

            cache_resident_bytes: register_int_gauge!(
                "jobmon_cache_resident_bytes",
                "Estimated weight of all resident cache entries"
            )
            .expect("Failed to register cache_resident_bytes"),

            cache_entries: register_int_gauge!(
                "jobmon_cache_entries",
                "Number of resident cache entries"
            )
            .expect("Failed to register cache_entries"),

            metric_loads: register_int_counter_vec!(
                "jobmon_metric_loads_total",
                "Job metric loads by data source",
                &["source"]
            )
            .expect("Failed to register metric_loads"),

            metric_load_errors: register_int_counter_vec!(
                "jobmon_metric_load_errors_total",
                "Failed job metric loads by error kind",
                &["kind"]
            )
            .expect("Failed to register metric_load_errors"),

            footprint_run_seconds: register_histogram!(
                "jobmon_footprint_run_seconds",
                "Duration of footprint aggregation runs",
                RUN_BUCKETS.to_vec()
            )
            .expect("Failed to register footprint_run_seconds"),

            footprint_jobs_updated: register_int_counter!(
                "jobmon_footprint_jobs_updated_total",
                "Running jobs whose footprint was updated"
            )
            .expect("Failed to register footprint_jobs_updated"),

            footprint_jobs_skipped: register_int_counter!(
                "jobmon_footprint_jobs_skipped_total",
                "Running jobs skipped by footprint aggregation"
            )
            .expect("Failed to register footprint_jobs_skipped"),

            retention_jobs_removed: register_int_counter_vec!(
                "jobmon_retention_jobs_total",
                "Jobs handled by retention by policy",
                &["policy"]
            )
            .expect("Failed to register retention_jobs_removed"),

            retention_inconsistencies: register_int_counter!(
                "jobmon_retention_inconsistencies_total",
                "Retention runs leaving archive and database out of step"
            )
            .expect("Failed to register retention_inconsistencies"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn inc_cache_hit(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().cache_misses.inc();
    }

    pub fn add_cache_evictions(&self, count: usize) {
        self.inner().cache_evictions.inc_by(count as u64);
    }

    /// Publish the current cache occupancy
    pub fn set_cache_usage(&self, bytes: usize, entries: usize) {
        self.inner().cache_resident_bytes.set(bytes as i64);
        self.inner().cache_entries.set(entries as i64);
    }

    /// Count a load served from `source` ("live" or "archive")
    pub fn inc_metric_load(&self, source: &str) {
        self.inner().metric_loads.with_label_values(&[source]).inc();
    }

    pub fn inc_metric_load_error(&self, kind: &str) {
        self.inner()
            .metric_load_errors
            .with_label_values(&[kind])
            .inc();
    }

    pub fn observe_footprint_run(&self, duration_secs: f64, updated: usize, skipped: usize) {
        let inner = self.inner();
        inner.footprint_run_seconds.observe(duration_secs);
        inner.footprint_jobs_updated.inc_by(updated as u64);
        inner.footprint_jobs_skipped.inc_by(skipped as u64);
    }

    pub fn add_retention_jobs(&self, policy: &str, count: usize) {
        self.inner()
            .retention_jobs_removed
            .with_label_values(&[policy])
            .inc_by(count as u64);
    }

    pub fn inc_retention_inconsistency(&self) {
        self.inner().retention_inconsistencies.inc();
    }
}

/// Structured logger for service events
///
/// Emits a fixed `event` field so lifecycle and maintenance records can
/// be filtered in the JSON log stream.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, clusters: usize, archive_enabled: bool) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            clusters = clusters,
            archive_enabled = archive_enabled,
            "Job monitoring service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Job monitoring service shutting down"
        );
    }

    pub fn log_footprint_run(&self, processed: usize, skipped: usize, total: usize, duration_ms: u128) {
        info!(
            event = "footprint_run_finished",
            instance = %self.instance,
            processed = processed,
            skipped = skipped,
            total = total,
            duration_ms = duration_ms as u64,
            "Footprint aggregation finished"
        );
    }

    pub fn log_retention_run(&self, policy: &str, selected: usize, archive_affected: usize, db_removed: usize) {
        info!(
            event = "retention_run_finished",
            instance = %self.instance,
            policy = %policy,
            selected = selected,
            archive_affected = archive_affected,
            db_removed = db_removed,
            "Retention run finished"
        );
    }

    /// Archive and database disagree after a retention run
    pub fn log_retention_inconsistency(&self, policy: &str, stage: &str, jobs: usize, details: &str) {
        warn!(
            event = "retention_inconsistency",
            instance = %self.instance,
            policy = %policy,
            stage = %stage,
            jobs = jobs,
            details = %details,
            "Archive and job repository out of step, repair required"
        );
    }
}
