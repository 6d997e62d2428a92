//! Failure handling of maintenance jobs against a store that breaks mid-run

use async_trait::async_trait;
use brokerwatch_metadata::{
    ArchiveOutcome, ArchivedMessage, Connection, HotMessage, HourlyStat, JobCounters, JobLog,
    JobStatus, JobType, MessageClassification, MetadataError, MetadataStore, MonitoredTopic,
    NewArchivedMessage, NewHotMessage, PolicyScope, Result, RetentionPolicy,
    SqliteMetadataStore, TopicUsage,
};
use brokerwatch_retention::{ArchivalEngine, MaintenanceConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const HOUR_MS: i64 = 3_600_000;

/// Delegates to SQLite, but the `fail_on`-th call to
/// `list_hot_messages_older_than` returns a database error.
struct FlakyStore {
    inner: SqliteMetadataStore,
    older_than_calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn create_connection(&self, name: &str, bootstrap_servers: &str) -> Result<Connection> {
        self.inner.create_connection(name, bootstrap_servers).await
    }

    async fn get_connection(&self, id: i64) -> Result<Option<Connection>> {
        self.inner.get_connection(id).await
    }

    async fn create_topic(
        &self,
        name: &str,
        connection_id: Option<i64>,
        monitored: bool,
    ) -> Result<MonitoredTopic> {
        self.inner.create_topic(name, connection_id, monitored).await
    }

    async fn get_topic(&self, id: i64) -> Result<Option<MonitoredTopic>> {
        self.inner.get_topic(id).await
    }

    async fn list_topics(&self) -> Result<Vec<MonitoredTopic>> {
        self.inner.list_topics().await
    }

    async fn list_monitored_topics(&self) -> Result<Vec<MonitoredTopic>> {
        self.inner.list_monitored_topics().await
    }

    async fn set_topic_monitored(&self, id: i64, monitored: bool) -> Result<()> {
        self.inner.set_topic_monitored(id, monitored).await
    }

    async fn insert_hot_message(&self, message: NewHotMessage) -> Result<HotMessage> {
        self.inner.insert_hot_message(message).await
    }

    async fn get_hot_message(&self, id: i64) -> Result<Option<HotMessage>> {
        self.inner.get_hot_message(id).await
    }

    async fn get_hot_messages(&self, ids: &[i64]) -> Result<Vec<HotMessage>> {
        self.inner.get_hot_messages(ids).await
    }

    async fn list_hot_messages_older_than(
        &self,
        topic_id: i64,
        cutoff: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>> {
        let call = self.older_than_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(MetadataError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        self.inner
            .list_hot_messages_older_than(topic_id, cutoff, exclude_bookmarked, limit)
            .await
    }

    async fn list_oldest_hot_messages(
        &self,
        topic_id: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>> {
        self.inner
            .list_oldest_hot_messages(topic_id, exclude_bookmarked, limit)
            .await
    }

    async fn list_hot_messages_between(
        &self,
        topic_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<HotMessage>> {
        self.inner.list_hot_messages_between(topic_id, start, end).await
    }

    async fn count_hot_messages_between(&self, topic_id: i64, start: i64, end: i64) -> Result<i64> {
        self.inner.count_hot_messages_between(topic_id, start, end).await
    }

    async fn topic_hot_usage(&self, topic_id: i64) -> Result<TopicUsage> {
        self.inner.topic_hot_usage(topic_id).await
    }

    async fn set_bookmark(&self, id: i64, bookmarked: bool) -> Result<HotMessage> {
        self.inner.set_bookmark(id, bookmarked).await
    }

    async fn archive_messages(&self, records: Vec<NewArchivedMessage>) -> Result<ArchiveOutcome> {
        self.inner.archive_messages(records).await
    }

    async fn restore_archived_messages(&self, ids: &[i64]) -> Result<u64> {
        self.inner.restore_archived_messages(ids).await
    }

    async fn list_archived_messages(&self, topic_id: i64, limit: i64) -> Result<Vec<ArchivedMessage>> {
        self.inner.list_archived_messages(topic_id, limit).await
    }

    async fn count_archived_messages(&self, topic_id: i64) -> Result<i64> {
        self.inner.count_archived_messages(topic_id).await
    }

    async fn delete_archives_before(&self, cutoff: i64) -> Result<u64> {
        self.inner.delete_archives_before(cutoff).await
    }

    async fn reset_topic_data(&self, topic_id: i64, delete_archives: bool) -> Result<(u64, u64)> {
        self.inner.reset_topic_data(topic_id, delete_archives).await
    }

    async fn create_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy> {
        self.inner.create_policy(policy).await
    }

    async fn update_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy> {
        self.inner.update_policy(policy).await
    }

    async fn find_active_policy(
        &self,
        scope: PolicyScope,
        scope_id: i64,
    ) -> Result<Option<RetentionPolicy>> {
        self.inner.find_active_policy(scope, scope_id).await
    }

    async fn get_global_policy(&self) -> Result<Option<RetentionPolicy>> {
        self.inner.get_global_policy().await
    }

    async fn ensure_global_policy(&self, default: RetentionPolicy) -> Result<RetentionPolicy> {
        self.inner.ensure_global_policy(default).await
    }

    async fn try_start_job(&self, job_type: JobType, started_at: i64) -> Result<Option<JobLog>> {
        self.inner.try_start_job(job_type, started_at).await
    }

    async fn finish_job(
        &self,
        id: i64,
        status: JobStatus,
        counters: JobCounters,
        error_message: Option<String>,
        finished_at: i64,
    ) -> Result<JobLog> {
        self.inner
            .finish_job(id, status, counters, error_message, finished_at)
            .await
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobLog>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, job_type: Option<JobType>, limit: i64) -> Result<Vec<JobLog>> {
        self.inner.list_jobs(job_type, limit).await
    }

    async fn fail_started_jobs(&self, message: &str, finished_at: i64) -> Result<u64> {
        self.inner.fail_started_jobs(message, finished_at).await
    }

    async fn upsert_hourly_stat(&self, stat: HourlyStat) -> Result<()> {
        self.inner.upsert_hourly_stat(stat).await
    }

    async fn get_hourly_stat(&self, topic_id: i64, hour_start: i64) -> Result<Option<HourlyStat>> {
        self.inner.get_hourly_stat(topic_id, hour_start).await
    }

    async fn list_hourly_stats(&self, topic_id: i64) -> Result<Vec<HourlyStat>> {
        self.inner.list_hourly_stats(topic_id).await
    }

    async fn delete_hourly_stats_before(&self, cutoff: i64) -> Result<u64> {
        self.inner.delete_hourly_stats_before(cutoff).await
    }
}

async fn ingest(store: &Arc<dyn MetadataStore>, topic_id: i64, timestamp: i64, size_bytes: i64) {
    store
        .insert_hot_message(NewHotMessage {
            topic_id,
            key: None,
            value: Some("x".repeat(size_bytes as usize)),
            partition: 0,
            offset: timestamp,
            timestamp,
            size_bytes,
            classification: MessageClassification::Normal,
            headers: HashMap::new(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failure_on_later_topic_marks_job_failed_and_keeps_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let inner = SqliteMetadataStore::new(dir.path().join("flaky.db"))
        .await
        .unwrap();
    let store: Arc<dyn MetadataStore> = Arc::new(FlakyStore {
        inner,
        older_than_calls: AtomicUsize::new(0),
        fail_on: 2,
    });

    let conn = store
        .create_connection("local", "localhost:9092")
        .await
        .unwrap();
    let orders = store.create_topic("orders", Some(conn.id), true).await.unwrap();
    let payments = store.create_topic("payments", Some(conn.id), true).await.unwrap();

    let old = chrono::Utc::now().timestamp_millis() - 48 * HOUR_MS;
    ingest(&store, orders.id, old, 25).await;
    ingest(&store, payments.id, old, 15).await;

    let engine = ArchivalEngine::new(
        store.clone(),
        MaintenanceConfig {
            batch_size: 2,
            ..MaintenanceConfig::default()
        },
    );
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.job_type, JobType::Archive);
    assert_eq!(log.status, JobStatus::Failed);
    let message = log.error_message.as_deref().unwrap();
    assert!(message.contains("timed out"), "unexpected error: {}", message);
    assert!(log.finished_at.is_some());

    // The first topic's batch was committed before the failure.
    assert_eq!(log.messages_archived, 1);
    assert_eq!(log.bytes_freed, 25);
    assert_eq!(store.count_archived_messages(orders.id).await.unwrap(), 1);
    assert_eq!(store.topic_hot_usage(orders.id).await.unwrap().message_count, 0);

    assert_eq!(store.count_archived_messages(payments.id).await.unwrap(), 0);
    assert_eq!(store.topic_hot_usage(payments.id).await.unwrap().message_count, 1);

    // Nothing is left STARTED, so the next run proceeds and finishes the work.
    let log = engine.archive_old_messages().await.unwrap().unwrap();
    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_archived, 1);
    assert_eq!(store.count_archived_messages(payments.id).await.unwrap(), 1);

    let jobs = store.list_jobs(Some(JobType::Archive), 10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status != JobStatus::Started));
}
