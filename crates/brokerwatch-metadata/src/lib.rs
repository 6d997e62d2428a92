//! brokerwatch Metadata Store
//!
//! This crate owns everything brokerwatch persists:
//! - **Connections / Topics**: which topics are monitored and how to reach them
//! - **Hot messages**: recently ingested records, written by the consumer workers
//! - **Archived messages**: denormalized copies moved out of hot storage
//! - **Retention policies**: scoped tiering rules
//! - **Job logs**: one audit row per maintenance run
//! - **Hourly stats**: per-topic usage buckets
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   save    ┌─────────────────┐   archive/purge   ┌───────────────────┐
//! │ Consumer workers │ ────────► │  hot_messages   │ ────────────────► │ archived_messages │
//! └──────────────────┘           └─────────────────┘                   └───────────────────┘
//!                                        │ hourly fold
//!                                        ▼
//!                                ┌─────────────────┐
//!                                │  hourly_stats   │
//!                                └─────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use brokerwatch_metadata::{MetadataStore, SqliteMetadataStore};
//!
//! let store = SqliteMetadataStore::new("brokerwatch.db").await?;
//! let conn = store.create_connection("prod", "kafka-1:9092").await?;
//! let topic = store.create_topic("orders", Some(conn.id), true).await?;
//! let monitored = store.list_monitored_topics().await?;
//! ```
//!
//! ## Thread Safety
//! - SQLx connection pool handles concurrent access
//! - Multi-row mutations (archiving a batch, resetting a topic) run in one transaction
//! - Safe to share across async tasks via `Arc<dyn MetadataStore>`

pub mod error;
pub mod store;
pub mod types;

pub use error::{MetadataError, Result};
pub use store::SqliteMetadataStore;
pub use types::*;

use async_trait::async_trait;

/// Metadata store trait - abstracts over storage backends.
///
/// All implementations must be Send + Sync so they can be shared via
/// `Arc<dyn MetadataStore>` between the orchestrator, the consumer workers and
/// the maintenance engines.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ============================================================
    // CONNECTION & TOPIC OPERATIONS
    // ============================================================

    /// Register a broker connection.
    ///
    /// # Errors
    ///
    /// - `ConflictError`: a connection with this name already exists
    async fn create_connection(&self, name: &str, bootstrap_servers: &str) -> Result<Connection>;

    /// Get a connection by id.
    async fn get_connection(&self, id: i64) -> Result<Option<Connection>>;

    /// Register a topic, optionally bound to a connection.
    ///
    /// # Errors
    ///
    /// - `ConnectionNotFound`: `connection_id` does not exist
    async fn create_topic(
        &self,
        name: &str,
        connection_id: Option<i64>,
        monitored: bool,
    ) -> Result<MonitoredTopic>;

    /// Get a topic (with denormalized connection info) by id.
    async fn get_topic(&self, id: i64) -> Result<Option<MonitoredTopic>>;

    /// List all topics, ordered by id.
    async fn list_topics(&self) -> Result<Vec<MonitoredTopic>>;

    /// List topics flagged for live ingestion, ordered by id.
    async fn list_monitored_topics(&self) -> Result<Vec<MonitoredTopic>>;

    /// Flip the monitored flag.
    ///
    /// # Errors
    ///
    /// - `TopicNotFound`: topic doesn't exist
    async fn set_topic_monitored(&self, id: i64, monitored: bool) -> Result<()>;

    // ============================================================
    // HOT STORAGE
    // ============================================================

    /// Persist one ingested record.
    ///
    /// The row and the topic's counter and last-message timestamp are written
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// - `TopicNotFound`: topic doesn't exist (nothing is written)
    async fn insert_hot_message(&self, message: NewHotMessage) -> Result<HotMessage>;

    /// Get a hot message by id.
    async fn get_hot_message(&self, id: i64) -> Result<Option<HotMessage>>;

    /// Hot messages by id. Unknown ids are skipped.
    async fn get_hot_messages(&self, ids: &[i64]) -> Result<Vec<HotMessage>>;

    /// Oldest hot messages of a topic with `timestamp < cutoff`.
    ///
    /// When `exclude_bookmarked` is set, bookmarked rows are not returned.
    async fn list_hot_messages_older_than(
        &self,
        topic_id: i64,
        cutoff: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>>;

    /// Oldest hot messages of a topic regardless of age.
    ///
    /// When `exclude_bookmarked` is set, bookmarked rows are not returned.
    async fn list_oldest_hot_messages(
        &self,
        topic_id: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>>;

    /// Hot messages of a topic with `start <= timestamp < end`.
    async fn list_hot_messages_between(
        &self,
        topic_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<HotMessage>>;

    /// Count of hot messages of a topic with `start <= timestamp < end`.
    async fn count_hot_messages_between(&self, topic_id: i64, start: i64, end: i64) -> Result<i64>;

    /// Current hot storage usage of a topic.
    async fn topic_hot_usage(&self, topic_id: i64) -> Result<TopicUsage>;

    /// Set or clear the bookmark flag.
    ///
    /// # Errors
    ///
    /// - `MessageNotFound`: no hot message with this id
    async fn set_bookmark(&self, id: i64, bookmarked: bool) -> Result<HotMessage>;

    // ============================================================
    // ARCHIVE STORAGE
    // ============================================================

    /// Move a batch of hot messages into archive storage.
    ///
    /// In one transaction: inserts every archive row, deletes the hot rows by
    /// `original_id`, and decreases each affected topic's message counter.
    /// Hot rows that no longer exist are skipped, so replaying a batch
    /// writes nothing.
    async fn archive_messages(&self, records: Vec<NewArchivedMessage>) -> Result<ArchiveOutcome>;

    /// Move archive rows back into hot storage. Returns the number restored.
    async fn restore_archived_messages(&self, ids: &[i64]) -> Result<u64>;

    /// Most recently archived rows of a topic.
    async fn list_archived_messages(&self, topic_id: i64, limit: i64) -> Result<Vec<ArchivedMessage>>;

    /// Number of archive rows for a topic.
    async fn count_archived_messages(&self, topic_id: i64) -> Result<i64>;

    /// Delete archive rows with `archived_at < cutoff`. Returns rows deleted.
    async fn delete_archives_before(&self, cutoff: i64) -> Result<u64>;

    /// Delete a topic's hot rows, optionally its archive rows, and zero its
    /// counter, in one transaction. Returns `(hot_deleted, archives_deleted)`.
    async fn reset_topic_data(&self, topic_id: i64, delete_archives: bool) -> Result<(u64, u64)>;

    // ============================================================
    // RETENTION POLICIES
    // ============================================================

    /// Persist a policy (its `id` is ignored) and return it with the assigned id.
    ///
    /// # Errors
    ///
    /// - `ConflictError`: a second GLOBAL policy
    async fn create_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy>;

    /// Overwrite a stored policy.
    ///
    /// # Errors
    ///
    /// - `PolicyNotFound`: no policy with `policy.id`
    async fn update_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy>;

    /// Highest-priority active policy for a connection or topic scope.
    async fn find_active_policy(
        &self,
        scope: PolicyScope,
        scope_id: i64,
    ) -> Result<Option<RetentionPolicy>>;

    /// The global policy, if one has been stored.
    async fn get_global_policy(&self) -> Result<Option<RetentionPolicy>>;

    /// Store `default` as the global policy unless one exists, then return the
    /// stored global policy. Idempotent.
    async fn ensure_global_policy(&self, default: RetentionPolicy) -> Result<RetentionPolicy>;

    // ============================================================
    // JOB LOGS
    // ============================================================

    /// Atomically open a STARTED job log unless one of the same type is
    /// already STARTED. Returns `None` in that case.
    async fn try_start_job(&self, job_type: JobType, started_at: i64) -> Result<Option<JobLog>>;

    /// Finalize a STARTED job. `status` must be COMPLETED or FAILED.
    ///
    /// # Errors
    ///
    /// - `JobNotFound`: no STARTED job with this id
    async fn finish_job(
        &self,
        id: i64,
        status: JobStatus,
        counters: JobCounters,
        error_message: Option<String>,
        finished_at: i64,
    ) -> Result<JobLog>;

    /// Get a job log by id.
    async fn get_job(&self, id: i64) -> Result<Option<JobLog>>;

    /// Most recent job logs, optionally of one type.
    async fn list_jobs(&self, job_type: Option<JobType>, limit: i64) -> Result<Vec<JobLog>>;

    /// Mark every STARTED job FAILED with `message`. Returns rows updated.
    async fn fail_started_jobs(&self, message: &str, finished_at: i64) -> Result<u64>;

    // ============================================================
    // HOURLY STATS
    // ============================================================

    /// Insert or replace the bucket for `(stat.topic_id, stat.hour_start)`.
    async fn upsert_hourly_stat(&self, stat: HourlyStat) -> Result<()>;

    /// Get one bucket.
    async fn get_hourly_stat(&self, topic_id: i64, hour_start: i64) -> Result<Option<HourlyStat>>;

    /// All buckets of a topic, oldest first.
    async fn list_hourly_stats(&self, topic_id: i64) -> Result<Vec<HourlyStat>>;

    /// Delete buckets with `hour_start < cutoff`. Returns rows deleted.
    async fn delete_hourly_stats_before(&self, cutoff: i64) -> Result<u64>;
}
