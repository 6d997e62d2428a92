//! Integration tests for archival, purge, stats and scheduling
//!
//! Every test runs against its own SQLite file in a temp directory.

use brokerwatch_metadata::{
    ArchiveReason, HourlyStat, JobStatus, JobType, MessageClassification, MetadataStore,
    MonitoredTopic, NewArchivedMessage, NewHotMessage, PolicyScope, RetentionPolicy,
    SqliteMetadataStore,
};
use brokerwatch_retention::{
    default_policy, ArchivalEngine, MaintenanceConfig, MaintenanceScheduler, PolicyResolver,
    PurgeEngine, ResetSummary, RetentionError, StatsAggregator,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

async fn create_store(name: &str) -> (TempDir, Arc<dyn MetadataStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteMetadataStore::new(dir.path().join(format!("{}.db", name)))
        .await
        .unwrap();
    (dir, Arc::new(store))
}

async fn create_topic(store: &Arc<dyn MetadataStore>, name: &str) -> MonitoredTopic {
    let conn = store
        .create_connection(&format!("{}-cluster", name), "localhost:9092")
        .await
        .unwrap();
    store.create_topic(name, Some(conn.id), true).await.unwrap()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Insert a hot message the way ingestion does.
async fn ingest(
    store: &Arc<dyn MetadataStore>,
    topic_id: i64,
    timestamp: i64,
    size_bytes: i64,
    classification: MessageClassification,
) -> i64 {
    let saved = store
        .insert_hot_message(NewHotMessage {
            topic_id,
            key: None,
            value: Some("x".repeat(size_bytes as usize)),
            partition: 0,
            offset: timestamp,
            timestamp,
            size_bytes,
            classification,
            headers: HashMap::new(),
        })
        .await
        .unwrap();
    saved.id
}

fn scoped(name: &str, scope: PolicyScope, scope_id: Option<i64>) -> RetentionPolicy {
    RetentionPolicy {
        name: name.to_string(),
        scope,
        scope_id,
        ..default_policy()
    }
}

fn fast_config() -> MaintenanceConfig {
    MaintenanceConfig {
        batch_size: 2,
        archive_interval_ms: 50,
        purge_interval_ms: 50,
        stats_interval_ms: 50,
        stats_cleanup_interval_ms: 50,
    }
}

// ============================================================================
// Archival
// ============================================================================

#[tokio::test]
async fn test_archive_three_old_messages() {
    let (_dir, store) = create_store("archive").await;
    let topic = create_topic(&store, "orders").await;
    let old = now_ms() - 48 * HOUR_MS;

    for (i, size) in [10, 20, 30].into_iter().enumerate() {
        ingest(&store, topic.id, old + i as i64, size, MessageClassification::Normal).await;
    }

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.job_type, JobType::Archive);
    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_archived, 3);
    assert_eq!(log.bytes_freed, 60);
    assert!(log.duration_ms.is_some());

    assert_eq!(store.topic_hot_usage(topic.id).await.unwrap().message_count, 0);
    assert_eq!(store.count_archived_messages(topic.id).await.unwrap(), 3);
    assert_eq!(store.get_topic(topic.id).await.unwrap().unwrap().message_count, 0);
    assert_eq!(store.list_jobs(Some(JobType::Archive), 10).await.unwrap().len(), 1);

    let archived = store.list_archived_messages(topic.id, 10).await.unwrap();
    assert!(archived.iter().all(|a| a.reason == ArchiveReason::Retention));
    assert!(archived.iter().all(|a| a.topic_name == "orders"));
    assert!(archived
        .iter()
        .all(|a| a.connection_name.as_deref() == Some("orders-cluster")));
}

#[tokio::test]
async fn test_archive_batches_and_keeps_recent_rows() {
    let (_dir, store) = create_store("batches").await;
    let topic = create_topic(&store, "orders").await;
    let old = now_ms() - 30 * HOUR_MS;

    for i in 0..5 {
        ingest(&store, topic.id, old + i, 10, MessageClassification::Normal).await;
    }
    let fresh = ingest(&store, topic.id, now_ms(), 10, MessageClassification::Normal).await;

    // Batch size 2: three transactions for five rows.
    let engine = ArchivalEngine::new(store.clone(), fast_config());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.messages_archived, 5);
    assert_eq!(log.messages_processed, 5);
    assert!(store.get_hot_message(fresh).await.unwrap().is_some());

    // Archived plus hot always equals ingested.
    let hot = store.topic_hot_usage(topic.id).await.unwrap().message_count;
    let archived = store.count_archived_messages(topic.id).await.unwrap();
    assert_eq!(hot + archived, 6);
    assert_eq!(store.get_topic(topic.id).await.unwrap().unwrap().message_count, 1);
}

#[tokio::test]
async fn test_archive_is_noop_while_another_run_is_started() {
    let (_dir, store) = create_store("overlap").await;
    let topic = create_topic(&store, "orders").await;
    ingest(&store, topic.id, now_ms() - 48 * HOUR_MS, 10, MessageClassification::Normal).await;

    let running = store
        .try_start_job(JobType::Archive, now_ms())
        .await
        .unwrap()
        .unwrap();

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    assert!(engine.archive_old_messages().await.unwrap().is_none());
    assert!(engine.archive_topic(topic.id).await.unwrap().is_none());
    assert!(engine.archive_specific(&[1]).await.unwrap().is_none());

    let jobs = store.list_jobs(Some(JobType::Archive), 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, running.id);
    assert_eq!(store.topic_hot_usage(topic.id).await.unwrap().message_count, 1);
}

#[tokio::test]
async fn test_archiving_disabled_leaves_rows_alone() {
    let (_dir, store) = create_store("disabled").await;
    let topic = create_topic(&store, "audit").await;
    ingest(&store, topic.id, now_ms() - 100 * HOUR_MS, 10, MessageClassification::Normal).await;

    let mut policy = scoped("keep-hot", PolicyScope::Topic, Some(topic.id));
    policy.archive_enabled = false;
    policy.auto_purge_enabled = true;
    store.create_policy(policy).await.unwrap();

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_archived, 0);
    assert_eq!(store.topic_hot_usage(topic.id).await.unwrap().message_count, 1);
}

#[tokio::test]
async fn test_bookmarked_rows_stay_hot() {
    let (_dir, store) = create_store("bookmarks").await;
    let topic = create_topic(&store, "orders").await;
    let old = now_ms() - 48 * HOUR_MS;

    let pinned = ingest(&store, topic.id, old, 10, MessageClassification::Error).await;
    ingest(&store, topic.id, old + 1, 10, MessageClassification::Normal).await;

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    let message = engine.bookmark_message(pinned, true).await.unwrap();
    assert!(message.bookmarked);

    let log = engine.archive_old_messages().await.unwrap().unwrap();
    assert_eq!(log.messages_archived, 1);
    assert!(store.get_hot_message(pinned).await.unwrap().is_some());

    assert!(matches!(
        engine.bookmark_message(9_999, true).await,
        Err(RetentionError::MessageNotFound(9_999))
    ));
}

#[tokio::test]
async fn test_capacity_pass_archives_oldest_overflow() {
    let (_dir, store) = create_store("capacity").await;
    let topic = create_topic(&store, "clicks").await;
    let now = now_ms();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(ingest(&store, topic.id, now - 5_000 + i, 10, MessageClassification::Normal).await);
    }

    let mut policy = scoped("capped", PolicyScope::Topic, Some(topic.id));
    policy.hot_retention_hours = 1_000;
    policy.hot_max_messages = Some(2);
    store.create_policy(policy).await.unwrap();

    let engine = ArchivalEngine::new(store.clone(), fast_config());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.messages_archived, 3);
    assert_eq!(log.bytes_freed, 30);

    let remaining: Vec<i64> = store
        .list_oldest_hot_messages(topic.id, false, 10)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(remaining, ids[3..].to_vec());

    let archived = store.list_archived_messages(topic.id, 10).await.unwrap();
    assert!(archived.iter().all(|a| a.reason == ArchiveReason::Cleanup));
}

#[tokio::test]
async fn test_capacity_pass_skips_past_bookmarked_oldest_rows() {
    let (_dir, store) = create_store("capacity-bookmarks").await;
    let topic = create_topic(&store, "clicks").await;
    let now = now_ms();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(ingest(&store, topic.id, now - 5_000 + i, 10, MessageClassification::Normal).await);
    }

    // The whole first batch (batch size 2) is bookmarked.
    store.set_bookmark(ids[0], true).await.unwrap();
    store.set_bookmark(ids[1], true).await.unwrap();

    let mut policy = scoped("capped", PolicyScope::Topic, Some(topic.id));
    policy.hot_retention_hours = 1_000;
    policy.hot_max_messages = Some(3);
    policy.exclude_bookmarked = true;
    store.create_policy(policy).await.unwrap();

    let engine = ArchivalEngine::new(store.clone(), fast_config());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_archived, 2);

    let remaining: Vec<i64> = store
        .list_oldest_hot_messages(topic.id, false, 10)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(remaining, vec![ids[0], ids[1], ids[4]]);

    let unpinned = store
        .list_oldest_hot_messages(topic.id, true, 10)
        .await
        .unwrap();
    assert_eq!(unpinned.len(), 1);
    assert_eq!(unpinned[0].id, ids[4]);
}

#[tokio::test]
async fn test_capacity_by_bytes() {
    let (_dir, store) = create_store("capacity-bytes").await;
    let topic = create_topic(&store, "blobs").await;
    let now = now_ms();

    for (i, size) in [100, 50, 25].into_iter().enumerate() {
        ingest(&store, topic.id, now - 1_000 + i as i64, size, MessageClassification::Normal).await;
    }

    let mut policy = scoped("small", PolicyScope::Topic, Some(topic.id));
    policy.hot_max_size_bytes = Some(80);
    store.create_policy(policy).await.unwrap();

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    let log = engine.archive_old_messages().await.unwrap().unwrap();

    assert_eq!(log.messages_archived, 1);
    assert_eq!(log.bytes_freed, 100);
    assert_eq!(store.topic_hot_usage(topic.id).await.unwrap().total_size_bytes, 75);
}

#[tokio::test]
async fn test_manual_archiving() {
    let (_dir, store) = create_store("manual").await;
    let orders = create_topic(&store, "orders").await;
    let payments = create_topic(&store, "payments").await;
    let now = now_ms();

    for i in 0..3 {
        ingest(&store, orders.id, now + i, 10, MessageClassification::Normal).await;
    }
    let a = ingest(&store, payments.id, now, 7, MessageClassification::Normal).await;
    let b = ingest(&store, payments.id, now + 1, 8, MessageClassification::Normal).await;

    let engine = ArchivalEngine::new(store.clone(), fast_config());

    assert!(matches!(
        engine.archive_topic(4_242).await,
        Err(RetentionError::TopicNotFound(4_242))
    ));
    assert!(store.list_jobs(None, 10).await.unwrap().is_empty());

    // Recent rows are archived regardless of the cutoff.
    let log = engine.archive_topic(orders.id).await.unwrap().unwrap();
    assert_eq!(log.messages_archived, 3);
    assert_eq!(store.topic_hot_usage(orders.id).await.unwrap().message_count, 0);

    let log = engine.archive_specific(&[a, 123_456]).await.unwrap().unwrap();
    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_archived, 1);
    assert_eq!(log.bytes_freed, 7);
    assert!(store.get_hot_message(b).await.unwrap().is_some());

    let archived = store.list_archived_messages(payments.id, 10).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].original_id, a);
    assert_eq!(archived[0].reason, ArchiveReason::Manual);
}

#[tokio::test]
async fn test_reset_and_restore() {
    let (_dir, store) = create_store("reset").await;
    let topic = create_topic(&store, "orders").await;
    let now = now_ms();

    for i in 0..4 {
        ingest(&store, topic.id, now + i, 10, MessageClassification::Normal).await;
    }

    let engine = ArchivalEngine::new(store.clone(), MaintenanceConfig::default());
    let ids: Vec<i64> = store
        .list_oldest_hot_messages(topic.id, false, 2)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    engine.archive_specific(&ids).await.unwrap().unwrap();

    let archive_ids: Vec<i64> = store
        .list_archived_messages(topic.id, 10)
        .await
        .unwrap()
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(engine.restore_archived(&archive_ids[..1]).await.unwrap(), 1);
    assert_eq!(store.get_topic(topic.id).await.unwrap().unwrap().message_count, 3);

    let summary = engine.reset_topic(topic.id, false).await.unwrap();
    assert_eq!(
        summary,
        ResetSummary {
            hot_deleted: 3,
            archives_deleted: 0
        }
    );
    assert_eq!(store.count_archived_messages(topic.id).await.unwrap(), 1);

    let summary = engine.reset_topic(topic.id, true).await.unwrap();
    assert_eq!(summary.archives_deleted, 1);
    assert_eq!(store.get_topic(topic.id).await.unwrap().unwrap().message_count, 0);

    assert!(matches!(
        engine.reset_topic(777, true).await,
        Err(RetentionError::TopicNotFound(777))
    ));
}

// ============================================================================
// Policy resolution
// ============================================================================

#[tokio::test]
async fn test_connection_policy_outranks_global() {
    let (_dir, store) = create_store("resolver").await;
    let topic = create_topic(&store, "orders").await;
    let connection_id = topic.connection_id.unwrap();

    store
        .create_policy(scoped("G", PolicyScope::Global, None))
        .await
        .unwrap();
    store
        .create_policy(scoped("P2", PolicyScope::Connection, Some(connection_id)))
        .await
        .unwrap();

    let resolver = PolicyResolver::new(store.clone());
    let policy = resolver
        .effective_policy(topic.id, Some(connection_id))
        .await
        .unwrap();
    assert_eq!(policy.name, "P2");

    let other = create_topic(&store, "other").await;
    let policy = resolver
        .effective_policy(other.id, other.connection_id)
        .await
        .unwrap();
    assert_eq!(policy.name, "G");
}

// ============================================================================
// Purge
// ============================================================================

#[tokio::test]
async fn test_purge_deletes_expired_archives() {
    let (_dir, store) = create_store("purge").await;
    let topic = create_topic(&store, "orders").await;
    let now = now_ms();

    let old = ingest(&store, topic.id, now - 60 * DAY_MS, 10, MessageClassification::Normal).await;
    let recent = ingest(&store, topic.id, now, 10, MessageClassification::Normal).await;

    let topic = store.get_topic(topic.id).await.unwrap().unwrap();
    let mut records = Vec::new();
    for (id, archived_at) in [(old, now - 45 * DAY_MS), (recent, now)] {
        let message = store.get_hot_message(id).await.unwrap().unwrap();
        records.push(NewArchivedMessage::from_hot(
            &message,
            &topic,
            ArchiveReason::Retention,
            archived_at,
        ));
    }
    store.archive_messages(records).await.unwrap();

    let engine = PurgeEngine::new(store.clone());
    assert!(engine.auto_purge_enabled().await.unwrap());

    let log = engine.purge_expired_archives().await.unwrap().unwrap();
    assert_eq!(log.job_type, JobType::PurgeArchive);
    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.messages_deleted, 1);
    assert_eq!(log.bytes_freed, 0);
    assert_eq!(store.count_archived_messages(topic.id).await.unwrap(), 1);

    // Purging materialized the global policy.
    let global = store.get_global_policy().await.unwrap().unwrap();
    assert_eq!(global.archive_retention_days, 30);
}

// ============================================================================
// Stats
// ============================================================================

#[tokio::test]
async fn test_stats_rerun_yields_single_bucket() {
    let (_dir, store) = create_store("stats").await;
    let topic = create_topic(&store, "orders").await;
    let quiet = create_topic(&store, "quiet").await;
    let hour = (now_ms() / HOUR_MS - 3) * HOUR_MS;

    ingest(&store, topic.id, hour + 1_000, 10, MessageClassification::Normal).await;
    ingest(&store, topic.id, hour + 2_000, 30, MessageClassification::Error).await;
    ingest(&store, topic.id, hour + 10 * 60_000, 20, MessageClassification::Warning).await;
    ingest(&store, topic.id, hour + HOUR_MS, 500, MessageClassification::Normal).await;

    let aggregator = StatsAggregator::new(store.clone());

    let first = aggregator.aggregate_stats_for_hour(hour + 42).await.unwrap().unwrap();
    let second = aggregator.aggregate_stats_for_hour(hour).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.messages_processed, 3);

    let buckets = store.list_hourly_stats(topic.id).await.unwrap();
    assert_eq!(buckets.len(), 1);
    let bucket = &buckets[0];
    assert_eq!(bucket.hour_start, hour);
    assert_eq!(bucket.message_count, 3);
    assert_eq!(bucket.total_size_bytes, 60);
    assert_eq!(bucket.min_size_bytes, 10);
    assert_eq!(bucket.max_size_bytes, 30);
    assert_eq!(bucket.error_count, 1);
    assert_eq!(bucket.warning_count, 1);
    assert_eq!(bucket.peak_minute_count, 2);

    assert!(store.list_hourly_stats(quiet.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cleanup_old_stats() {
    let (_dir, store) = create_store("stats-cleanup").await;
    let topic = create_topic(&store, "orders").await;
    let now = now_ms();

    for hour_start in [now - 120 * DAY_MS, now - HOUR_MS] {
        store
            .upsert_hourly_stat(HourlyStat {
                topic_id: topic.id,
                hour_start,
                message_count: 1,
                total_size_bytes: 1,
                min_size_bytes: 1,
                max_size_bytes: 1,
                avg_size_bytes: 1.0,
                normal_count: 1,
                error_count: 0,
                warning_count: 0,
                system_count: 0,
                messages_per_minute: 1.0 / 60.0,
                peak_minute_count: 1,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    let aggregator = StatsAggregator::new(store.clone());
    let log = aggregator.cleanup_old_stats().await.unwrap().unwrap();

    assert_eq!(log.job_type, JobType::StatsCleanup);
    assert_eq!(log.messages_deleted, 1);
    assert_eq!(store.list_hourly_stats(topic.id).await.unwrap().len(), 1);
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test]
async fn test_scheduler_runs_jobs_and_respects_auto_purge() {
    let (_dir, store) = create_store("scheduler").await;
    let topic = create_topic(&store, "orders").await;
    ingest(&store, topic.id, now_ms() - 48 * HOUR_MS, 10, MessageClassification::Normal).await;

    let mut global = scoped("G", PolicyScope::Global, None);
    global.auto_purge_enabled = false;
    store.create_policy(global).await.unwrap();

    // Left behind by a crashed process.
    let orphan = store
        .try_start_job(JobType::StatsCleanup, now_ms() - 1_000)
        .await
        .unwrap()
        .unwrap();

    let scheduler = MaintenanceScheduler::new(store.clone(), fast_config());
    scheduler.start().await.unwrap();
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown().await;

    let orphan = store.get_job(orphan.id).await.unwrap().unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);

    let archive_jobs = store.list_jobs(Some(JobType::Archive), 100).await.unwrap();
    assert!(!archive_jobs.is_empty());
    assert!(archive_jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert_eq!(store.topic_hot_usage(topic.id).await.unwrap().message_count, 0);

    let cleanup_jobs = store.list_jobs(Some(JobType::StatsCleanup), 100).await.unwrap();
    assert!(cleanup_jobs.iter().any(|j| j.status == JobStatus::Completed));

    assert!(store
        .list_jobs(Some(JobType::PurgeArchive), 100)
        .await
        .unwrap()
        .is_empty());

    // Nothing is left STARTED after shutdown.
    let all = store.list_jobs(None, 1_000).await.unwrap();
    assert!(all.iter().all(|j| j.status != JobStatus::Started));

    // Not restartable once shut down.
    let count = all.len();
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.list_jobs(None, 1_000).await.unwrap().len(), count);
}
