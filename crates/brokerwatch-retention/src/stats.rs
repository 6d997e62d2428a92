//! Hourly Stats Aggregation
//!
//! Each bucket is rebuilt from the hot rows of its hour and upserted on
//! `(topic_id, hour_start)`, so aggregating the same hour again replaces the
//! row instead of adding a second one or double counting. Hours without
//! messages get no bucket.
//!
//! Rows are placed by their broker timestamp.

use brokerwatch_metadata::{
    HotMessage, HourlyStat, JobCounters, JobLog, JobType, MessageClassification, MetadataStore,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::job::JobRunner;
use crate::resolver::PolicyResolver;
use crate::{now_ms, DAY_MS, HOUR_MS, MINUTE_MS};

/// Fold one hour of messages into a bucket. `None` for an empty hour.
///
/// Messages outside `[hour_start, hour_start + 1h)` are ignored.
pub fn build_hour_bucket(
    topic_id: i64,
    hour_start: i64,
    messages: &[HotMessage],
    updated_at: i64,
) -> Option<HourlyStat> {
    let mut per_minute = [0i64; 60];
    let mut stat = HourlyStat {
        topic_id,
        hour_start,
        message_count: 0,
        total_size_bytes: 0,
        min_size_bytes: i64::MAX,
        max_size_bytes: 0,
        avg_size_bytes: 0.0,
        normal_count: 0,
        error_count: 0,
        warning_count: 0,
        system_count: 0,
        messages_per_minute: 0.0,
        peak_minute_count: 0,
        updated_at,
    };

    for message in messages {
        let offset = message.timestamp - hour_start;
        if !(0..HOUR_MS).contains(&offset) {
            continue;
        }

        stat.message_count += 1;
        stat.total_size_bytes += message.size_bytes;
        stat.min_size_bytes = stat.min_size_bytes.min(message.size_bytes);
        stat.max_size_bytes = stat.max_size_bytes.max(message.size_bytes);

        match message.classification {
            MessageClassification::Normal => stat.normal_count += 1,
            MessageClassification::Error => stat.error_count += 1,
            MessageClassification::Warning => stat.warning_count += 1,
            MessageClassification::System => stat.system_count += 1,
        }

        per_minute[(offset / MINUTE_MS) as usize] += 1;
    }

    if stat.message_count == 0 {
        return None;
    }

    stat.avg_size_bytes = stat.total_size_bytes as f64 / stat.message_count as f64;
    stat.messages_per_minute = stat.message_count as f64 / 60.0;
    stat.peak_minute_count = per_minute.iter().copied().max().unwrap_or(0);

    Some(stat)
}

/// Start of the hour containing `timestamp`.
pub(crate) fn hour_floor(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(HOUR_MS)
}

pub struct StatsAggregator {
    store: Arc<dyn MetadataStore>,
    resolver: PolicyResolver,
    jobs: JobRunner,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            resolver: PolicyResolver::new(store.clone()),
            jobs: JobRunner::new(store.clone()),
            store,
        }
    }

    /// STATS_AGGREGATE job for the previous complete hour.
    pub async fn aggregate_stats(&self) -> Result<Option<JobLog>> {
        let previous_hour = hour_floor(now_ms()) - HOUR_MS;
        self.aggregate_stats_for_hour(previous_hour).await
    }

    /// STATS_AGGREGATE job for the hour containing `hour_start`.
    pub async fn aggregate_stats_for_hour(&self, hour_start: i64) -> Result<Option<JobLog>> {
        let Some(mut job) = self.jobs.begin(JobType::StatsAggregate).await? else {
            return Ok(None);
        };

        let outcome = self
            .aggregate_hour(hour_floor(hour_start), job.counters_mut())
            .await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn aggregate_hour(&self, hour_start: i64, counters: &mut JobCounters) -> Result<()> {
        let hour_end = hour_start + HOUR_MS;
        let mut buckets = 0;

        for topic in self.store.list_topics().await? {
            let count = self
                .store
                .count_hot_messages_between(topic.id, hour_start, hour_end)
                .await?;
            if count == 0 {
                continue;
            }

            let messages = self
                .store
                .list_hot_messages_between(topic.id, hour_start, hour_end)
                .await?;
            counters.messages_processed += messages.len() as i64;

            if let Some(stat) = build_hour_bucket(topic.id, hour_start, &messages, now_ms()) {
                debug!(
                    topic_id = topic.id,
                    hour_start,
                    message_count = stat.message_count,
                    "Upserting hourly bucket"
                );
                self.store.upsert_hourly_stat(stat).await?;
                buckets += 1;
            }
        }

        info!(hour_start, buckets, "Aggregated hourly stats");
        Ok(())
    }

    /// STATS_CLEANUP job deleting buckets past the global stats retention.
    pub async fn cleanup_old_stats(&self) -> Result<Option<JobLog>> {
        let Some(mut job) = self.jobs.begin(JobType::StatsCleanup).await? else {
            return Ok(None);
        };

        let outcome = self.cleanup(job.counters_mut()).await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn cleanup(&self, counters: &mut JobCounters) -> Result<()> {
        let policy = self.resolver.global_policy().await?;
        let cutoff = now_ms() - policy.stats_retention_days.max(0) * DAY_MS;

        let deleted = self.store.delete_hourly_stats_before(cutoff).await?;
        counters.messages_processed += deleted as i64;
        counters.messages_deleted += deleted as i64;

        info!(deleted, stats_retention_days = policy.stats_retention_days, "Deleted old hourly stats");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HOUR: i64 = 1_700_000_000_000 - 1_700_000_000_000 % HOUR_MS;

    fn message(timestamp: i64, size_bytes: i64, classification: MessageClassification) -> HotMessage {
        HotMessage {
            id: timestamp,
            topic_id: 1,
            key: None,
            value: None,
            partition: 0,
            offset: 0,
            timestamp,
            size_bytes,
            classification,
            bookmarked: false,
            headers: HashMap::new(),
            received_at: timestamp,
        }
    }

    #[test]
    fn test_hour_floor() {
        assert_eq!(hour_floor(HOUR), HOUR);
        assert_eq!(hour_floor(HOUR + HOUR_MS - 1), HOUR);
        assert_eq!(hour_floor(-1), -HOUR_MS);
    }

    #[test]
    fn test_bucket_folds_sizes_and_classes() {
        let messages = vec![
            message(HOUR, 10, MessageClassification::Normal),
            message(HOUR + 1_000, 30, MessageClassification::Error),
            message(HOUR + 2_000, 20, MessageClassification::Warning),
            message(HOUR + 5 * MINUTE_MS, 40, MessageClassification::System),
            // Next hour: ignored.
            message(HOUR + HOUR_MS, 999, MessageClassification::Error),
        ];

        let stat = build_hour_bucket(1, HOUR, &messages, 7).unwrap();
        assert_eq!(stat.message_count, 4);
        assert_eq!(stat.total_size_bytes, 100);
        assert_eq!(stat.min_size_bytes, 10);
        assert_eq!(stat.max_size_bytes, 40);
        assert_eq!(stat.avg_size_bytes, 25.0);
        assert_eq!(
            (stat.normal_count, stat.error_count, stat.warning_count, stat.system_count),
            (1, 1, 1, 1)
        );
        assert_eq!(stat.peak_minute_count, 3);
        assert!((stat.messages_per_minute - 4.0 / 60.0).abs() < f64::EPSILON);
        assert_eq!(stat.updated_at, 7);
    }

    #[test]
    fn test_empty_hour_has_no_bucket() {
        assert!(build_hour_bucket(1, HOUR, &[], 0).is_none());

        let outside = vec![message(HOUR - 1, 5, MessageClassification::Normal)];
        assert!(build_hour_bucket(1, HOUR, &outside, 0).is_none());
    }
}
