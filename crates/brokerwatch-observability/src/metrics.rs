use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Consumer Metrics
    // ============================================================================

    /// Records pulled from the broker by consumer workers
    pub static ref CONSUMER_RECORDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("brokerwatch_consumer_records_total", "Total records consumed"),
        &["topic"]
    ).expect("metric can be created");

    /// Records the message sink failed to persist
    pub static ref RECORD_PERSIST_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("brokerwatch_record_persist_failures_total", "Total records that failed to persist"),
        &["topic"]
    ).expect("metric can be created");

    /// Consumer iteration errors by category
    pub static ref CONSUMER_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("brokerwatch_consumer_errors_total", "Total consumer errors"),
        &["topic", "category"] // leader_unavailable, timeout, disconnect, auth_failure, unknown
    ).expect("metric can be created");

    /// Workers currently registered
    pub static ref ACTIVE_WORKERS: IntGauge = IntGauge::new(
        "brokerwatch_active_workers",
        "Number of live consumer workers"
    ).expect("metric can be created");

    /// Sliding-window throughput per topic
    pub static ref TOPIC_THROUGHPUT: GaugeVec = GaugeVec::new(
        Opts::new("brokerwatch_topic_throughput", "Per-topic throughput over the sliding window"),
        &["topic", "unit"] // records_per_sec, bytes_per_sec
    ).expect("metric can be created");

    // ============================================================================
    // Maintenance Metrics
    // ============================================================================

    /// Maintenance jobs by type and final status
    pub static ref MAINTENANCE_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("brokerwatch_maintenance_jobs_total", "Total maintenance jobs"),
        &["job_type", "status"]
    ).expect("metric can be created");

    /// Messages moved from hot to archive storage
    pub static ref MESSAGES_ARCHIVED_TOTAL: IntCounter = IntCounter::new(
        "brokerwatch_messages_archived_total",
        "Total messages archived"
    ).expect("metric can be created");

    /// Archive rows deleted by purge
    pub static ref ARCHIVES_PURGED_TOTAL: IntCounter = IntCounter::new(
        "brokerwatch_archives_purged_total",
        "Total archived messages purged"
    ).expect("metric can be created");

    /// Hot storage bytes freed by archiving
    pub static ref BYTES_FREED_TOTAL: IntCounter = IntCounter::new(
        "brokerwatch_bytes_freed_total",
        "Total hot storage bytes freed"
    ).expect("metric can be created");

    /// Maintenance job duration
    pub static ref JOB_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("brokerwatch_job_duration_seconds", "Maintenance job duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        // Consumer metrics
        REGISTRY
            .register(Box::new(CONSUMER_RECORDS_TOTAL.clone()))
            .expect("consumer_records_total can be registered");
        REGISTRY
            .register(Box::new(RECORD_PERSIST_FAILURES_TOTAL.clone()))
            .expect("record_persist_failures_total can be registered");
        REGISTRY
            .register(Box::new(CONSUMER_ERRORS_TOTAL.clone()))
            .expect("consumer_errors_total can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_WORKERS.clone()))
            .expect("active_workers can be registered");
        REGISTRY
            .register(Box::new(TOPIC_THROUGHPUT.clone()))
            .expect("topic_throughput can be registered");

        // Maintenance metrics
        REGISTRY
            .register(Box::new(MAINTENANCE_JOBS_TOTAL.clone()))
            .expect("maintenance_jobs_total can be registered");
        REGISTRY
            .register(Box::new(MESSAGES_ARCHIVED_TOTAL.clone()))
            .expect("messages_archived_total can be registered");
        REGISTRY
            .register(Box::new(ARCHIVES_PURGED_TOTAL.clone()))
            .expect("archives_purged_total can be registered");
        REGISTRY
            .register(Box::new(BYTES_FREED_TOTAL.clone()))
            .expect("bytes_freed_total can be registered");
        REGISTRY
            .register(Box::new(JOB_DURATION.clone()))
            .expect("job_duration can be registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
    }

    #[test]
    fn test_consumer_metrics() {
        CONSUMER_RECORDS_TOTAL.with_label_values(&["metrics-test"]).inc_by(3);
        CONSUMER_ERRORS_TOTAL
            .with_label_values(&["metrics-test", "timeout"])
            .inc();

        assert_eq!(
            CONSUMER_RECORDS_TOTAL.with_label_values(&["metrics-test"]).get(),
            3
        );
        assert_eq!(
            CONSUMER_ERRORS_TOTAL
                .with_label_values(&["metrics-test", "timeout"])
                .get(),
            1
        );
    }

    #[test]
    fn test_throughput_gauge() {
        TOPIC_THROUGHPUT
            .with_label_values(&["metrics-test", "records_per_sec"])
            .set(12.5);

        assert_eq!(
            TOPIC_THROUGHPUT
                .with_label_values(&["metrics-test", "records_per_sec"])
                .get(),
            12.5
        );
    }
}
