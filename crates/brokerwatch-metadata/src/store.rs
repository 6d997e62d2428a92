//! SQLite Metadata Store Implementation
//!
//! Implements [`MetadataStore`] on SQLite via SQLx.
//!
//! ## Usage
//!
//! ### File-Based (Production)
//! ```ignore
//! use brokerwatch_metadata::{SqliteMetadataStore, MetadataStore};
//!
//! // Creates brokerwatch.db (or opens it if it exists)
//! let store = SqliteMetadataStore::new("brokerwatch.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqliteMetadataStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! ### Runtime Queries
//! Uses `sqlx::query` with `.bind()` rather than the `query!` macros, so the
//! crate builds without a `DATABASE_URL`.
//!
//! ### Connection Pool
//! - File databases: 10 connections, WAL journal, 5s busy timeout
//! - In-memory databases: a single connection that never expires, since every
//!   SQLite connection to `:memory:` is a separate database
//!
//! ### Transactions
//! Archiving a batch, restoring archives and resetting a topic each run in one
//! transaction, so hot and archive storage never disagree about a message.

use crate::{
    error::{MetadataError, Result},
    types::*,
    MetadataStore,
};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const TOPIC_SELECT: &str = "SELECT t.id, t.name, t.connection_id, c.name AS connection_name, \
     c.bootstrap_servers, t.monitored, t.message_count, t.last_message_at, t.created_at \
     FROM topics t LEFT JOIN connections c ON c.id = t.connection_id";

const HOT_COLUMNS: &str = "id, topic_id, message_key, message_value, partition_id, message_offset, \
     timestamp, size_bytes, classification, bookmarked, headers, received_at";

const ARCHIVE_COLUMNS: &str = "id, original_id, topic_id, topic_name, connection_id, connection_name, \
     message_key, message_value, partition_id, message_offset, timestamp, size_bytes, \
     classification, bookmarked, headers, archived_at, reason";

const POLICY_COLUMNS: &str = "id, name, scope, scope_id, hot_retention_hours, hot_max_messages, \
     hot_max_size_bytes, archive_enabled, archive_retention_days, stats_retention_days, \
     auto_purge_enabled, exclude_bookmarked, priority, active, created_at, updated_at";

const JOB_COLUMNS: &str = "id, job_type, status, messages_processed, messages_archived, \
     messages_deleted, bytes_freed, started_at, finished_at, duration_ms, error_message";

const STAT_COLUMNS: &str = "topic_id, hour_start, message_count, total_size_bytes, min_size_bytes, \
     max_size_bytes, avg_size_bytes, normal_count, error_count, warning_count, system_count, \
     messages_per_minute, peak_minute_count, updated_at";

/// SQLite-based metadata store implementation
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) a SQLite database file and run migrations.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create in-memory database (for testing)
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn headers_from_json(raw: &str) -> HashMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn connection_from_row(r: &SqliteRow) -> Result<Connection> {
    Ok(Connection {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        bootstrap_servers: r.try_get("bootstrap_servers")?,
        created_at: r.try_get("created_at")?,
    })
}

fn topic_from_row(r: &SqliteRow) -> Result<MonitoredTopic> {
    Ok(MonitoredTopic {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        connection_id: r.try_get("connection_id")?,
        connection_name: r.try_get("connection_name")?,
        bootstrap_servers: r.try_get("bootstrap_servers")?,
        monitored: r.try_get("monitored")?,
        message_count: r.try_get("message_count")?,
        last_message_at: r.try_get("last_message_at")?,
        created_at: r.try_get("created_at")?,
    })
}

fn hot_from_row(r: &SqliteRow) -> Result<HotMessage> {
    let classification: String = r.try_get("classification")?;
    let headers: String = r.try_get("headers")?;

    Ok(HotMessage {
        id: r.try_get("id")?,
        topic_id: r.try_get("topic_id")?,
        key: r.try_get("message_key")?,
        value: r.try_get("message_value")?,
        partition: r.try_get("partition_id")?,
        offset: r.try_get("message_offset")?,
        timestamp: r.try_get("timestamp")?,
        size_bytes: r.try_get("size_bytes")?,
        classification: classification.parse()?,
        bookmarked: r.try_get("bookmarked")?,
        headers: headers_from_json(&headers),
        received_at: r.try_get("received_at")?,
    })
}

fn archive_from_row(r: &SqliteRow) -> Result<ArchivedMessage> {
    let classification: String = r.try_get("classification")?;
    let reason: String = r.try_get("reason")?;
    let headers: String = r.try_get("headers")?;

    Ok(ArchivedMessage {
        id: r.try_get("id")?,
        original_id: r.try_get("original_id")?,
        topic_id: r.try_get("topic_id")?,
        topic_name: r.try_get("topic_name")?,
        connection_id: r.try_get("connection_id")?,
        connection_name: r.try_get("connection_name")?,
        key: r.try_get("message_key")?,
        value: r.try_get("message_value")?,
        partition: r.try_get("partition_id")?,
        offset: r.try_get("message_offset")?,
        timestamp: r.try_get("timestamp")?,
        size_bytes: r.try_get("size_bytes")?,
        classification: classification.parse()?,
        bookmarked: r.try_get("bookmarked")?,
        headers: headers_from_json(&headers),
        archived_at: r.try_get("archived_at")?,
        reason: reason.parse()?,
    })
}

fn policy_from_row(r: &SqliteRow) -> Result<RetentionPolicy> {
    let scope: String = r.try_get("scope")?;

    Ok(RetentionPolicy {
        id: Some(r.try_get("id")?),
        name: r.try_get("name")?,
        scope: scope.parse()?,
        scope_id: r.try_get("scope_id")?,
        hot_retention_hours: r.try_get("hot_retention_hours")?,
        hot_max_messages: r.try_get("hot_max_messages")?,
        hot_max_size_bytes: r.try_get("hot_max_size_bytes")?,
        archive_enabled: r.try_get("archive_enabled")?,
        archive_retention_days: r.try_get("archive_retention_days")?,
        stats_retention_days: r.try_get("stats_retention_days")?,
        auto_purge_enabled: r.try_get("auto_purge_enabled")?,
        exclude_bookmarked: r.try_get("exclude_bookmarked")?,
        priority: r.try_get("priority")?,
        active: r.try_get("active")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn job_from_row(r: &SqliteRow) -> Result<JobLog> {
    let job_type: String = r.try_get("job_type")?;
    let status: String = r.try_get("status")?;

    Ok(JobLog {
        id: r.try_get("id")?,
        job_type: job_type.parse()?,
        status: status.parse()?,
        messages_processed: r.try_get("messages_processed")?,
        messages_archived: r.try_get("messages_archived")?,
        messages_deleted: r.try_get("messages_deleted")?,
        bytes_freed: r.try_get("bytes_freed")?,
        started_at: r.try_get("started_at")?,
        finished_at: r.try_get("finished_at")?,
        duration_ms: r.try_get("duration_ms")?,
        error_message: r.try_get("error_message")?,
    })
}

fn stat_from_row(r: &SqliteRow) -> Result<HourlyStat> {
    Ok(HourlyStat {
        topic_id: r.try_get("topic_id")?,
        hour_start: r.try_get("hour_start")?,
        message_count: r.try_get("message_count")?,
        total_size_bytes: r.try_get("total_size_bytes")?,
        min_size_bytes: r.try_get("min_size_bytes")?,
        max_size_bytes: r.try_get("max_size_bytes")?,
        avg_size_bytes: r.try_get("avg_size_bytes")?,
        normal_count: r.try_get("normal_count")?,
        error_count: r.try_get("error_count")?,
        warning_count: r.try_get("warning_count")?,
        system_count: r.try_get("system_count")?,
        messages_per_minute: r.try_get("messages_per_minute")?,
        peak_minute_count: r.try_get("peak_minute_count")?,
        updated_at: r.try_get("updated_at")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_connection(&self, name: &str, bootstrap_servers: &str) -> Result<Connection> {
        let now = Self::now_ms();

        let result = sqlx::query(
            "INSERT INTO connections (name, bootstrap_servers, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(bootstrap_servers)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::ConflictError(format!("connection '{}' already exists", name))
            } else {
                MetadataError::from(e)
            }
        })?;

        Ok(Connection {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            bootstrap_servers: bootstrap_servers.to_string(),
            created_at: now,
        })
    }

    async fn get_connection(&self, id: i64) -> Result<Option<Connection>> {
        let row = sqlx::query(
            "SELECT id, name, bootstrap_servers, created_at FROM connections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(connection_from_row).transpose()
    }

    async fn create_topic(
        &self,
        name: &str,
        connection_id: Option<i64>,
        monitored: bool,
    ) -> Result<MonitoredTopic> {
        if let Some(conn_id) = connection_id {
            if self.get_connection(conn_id).await?.is_none() {
                return Err(MetadataError::ConnectionNotFound(conn_id));
            }
        }

        let result = sqlx::query(
            "INSERT INTO topics (name, connection_id, monitored, message_count, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(name)
        .bind(connection_id)
        .bind(monitored)
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_topic(id)
            .await?
            .ok_or(MetadataError::TopicNotFound(id))
    }

    async fn get_topic(&self, id: i64) -> Result<Option<MonitoredTopic>> {
        let sql = format!("{} WHERE t.id = ?", TOPIC_SELECT);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(topic_from_row).transpose()
    }

    async fn list_topics(&self) -> Result<Vec<MonitoredTopic>> {
        let sql = format!("{} ORDER BY t.id", TOPIC_SELECT);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(topic_from_row).collect()
    }

    async fn list_monitored_topics(&self) -> Result<Vec<MonitoredTopic>> {
        let sql = format!("{} WHERE t.monitored = 1 ORDER BY t.id", TOPIC_SELECT);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(topic_from_row).collect()
    }

    async fn set_topic_monitored(&self, id: i64, monitored: bool) -> Result<()> {
        let result = sqlx::query("UPDATE topics SET monitored = ? WHERE id = ?")
            .bind(monitored)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::TopicNotFound(id));
        }
        Ok(())
    }

    async fn insert_hot_message(&self, message: NewHotMessage) -> Result<HotMessage> {
        let headers = serde_json::to_string(&message.headers)?;
        let received_at = Self::now_ms();

        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE topics
             SET message_count = message_count + 1,
                 last_message_at = MAX(COALESCE(last_message_at, 0), ?)
             WHERE id = ?",
        )
        .bind(message.timestamp)
        .bind(message.topic_id)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(MetadataError::TopicNotFound(message.topic_id));
        }

        let result = sqlx::query(
            "INSERT INTO hot_messages (
                topic_id, message_key, message_value, partition_id, message_offset,
                timestamp, size_bytes, classification, bookmarked, headers, received_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(message.topic_id)
        .bind(&message.key)
        .bind(&message.value)
        .bind(message.partition)
        .bind(message.offset)
        .bind(message.timestamp)
        .bind(message.size_bytes)
        .bind(message.classification.as_str())
        .bind(&headers)
        .bind(received_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(HotMessage {
            id: result.last_insert_rowid(),
            topic_id: message.topic_id,
            key: message.key,
            value: message.value,
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            size_bytes: message.size_bytes,
            classification: message.classification,
            bookmarked: false,
            headers: message.headers,
            received_at,
        })
    }

    async fn get_hot_message(&self, id: i64) -> Result<Option<HotMessage>> {
        let sql = format!("SELECT {} FROM hot_messages WHERE id = ?", HOT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(hot_from_row).transpose()
    }

    async fn get_hot_messages(&self, ids: &[i64]) -> Result<Vec<HotMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM hot_messages WHERE id IN ({}) ORDER BY id",
            HOT_COLUMNS,
            Self::placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(hot_from_row).collect()
    }

    async fn list_hot_messages_older_than(
        &self,
        topic_id: i64,
        cutoff: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>> {
        let sql = if exclude_bookmarked {
            format!(
                "SELECT {} FROM hot_messages
                 WHERE topic_id = ? AND timestamp < ? AND bookmarked = 0
                 ORDER BY timestamp, id LIMIT ?",
                HOT_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM hot_messages
                 WHERE topic_id = ? AND timestamp < ?
                 ORDER BY timestamp, id LIMIT ?",
                HOT_COLUMNS
            )
        };

        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(hot_from_row).collect()
    }

    async fn list_oldest_hot_messages(
        &self,
        topic_id: i64,
        exclude_bookmarked: bool,
        limit: i64,
    ) -> Result<Vec<HotMessage>> {
        let sql = if exclude_bookmarked {
            format!(
                "SELECT {} FROM hot_messages
                 WHERE topic_id = ? AND bookmarked = 0
                 ORDER BY timestamp, id LIMIT ?",
                HOT_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM hot_messages WHERE topic_id = ? ORDER BY timestamp, id LIMIT ?",
                HOT_COLUMNS
            )
        };
        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(hot_from_row).collect()
    }

    async fn list_hot_messages_between(
        &self,
        topic_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<HotMessage>> {
        let sql = format!(
            "SELECT {} FROM hot_messages
             WHERE topic_id = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp, id",
            HOT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(hot_from_row).collect()
    }

    async fn count_hot_messages_between(&self, topic_id: i64, start: i64, end: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM hot_messages
             WHERE topic_id = ? AND timestamp >= ? AND timestamp < ?",
        )
        .bind(topic_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("cnt")?)
    }

    async fn topic_hot_usage(&self, topic_id: i64) -> Result<TopicUsage> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, COALESCE(SUM(size_bytes), 0) AS total
             FROM hot_messages WHERE topic_id = ?",
        )
        .bind(topic_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(TopicUsage {
            message_count: row.try_get("cnt")?,
            total_size_bytes: row.try_get("total")?,
        })
    }

    async fn set_bookmark(&self, id: i64, bookmarked: bool) -> Result<HotMessage> {
        let result = sqlx::query("UPDATE hot_messages SET bookmarked = ? WHERE id = ?")
            .bind(bookmarked)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::MessageNotFound(id));
        }

        self.get_hot_message(id)
            .await?
            .ok_or(MetadataError::MessageNotFound(id))
    }

    async fn archive_messages(&self, records: Vec<NewArchivedMessage>) -> Result<ArchiveOutcome> {
        if records.is_empty() {
            return Ok(ArchiveOutcome::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut outcome = ArchiveOutcome::default();
        let mut per_topic: HashMap<i64, i64> = HashMap::new();

        for record in &records {
            // A hot row that is already gone (archived or reset concurrently)
            // must not produce an archive copy.
            let deleted = sqlx::query("DELETE FROM hot_messages WHERE id = ?")
                .bind(record.original_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if deleted == 0 {
                debug!(message_id = record.original_id, "Hot message vanished before archiving");
                continue;
            }

            let headers = serde_json::to_string(&record.headers)?;

            sqlx::query(
                "INSERT INTO archived_messages (
                    original_id, topic_id, topic_name, connection_id, connection_name,
                    message_key, message_value, partition_id, message_offset, timestamp,
                    size_bytes, classification, bookmarked, headers, archived_at, reason
                 )
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.original_id)
            .bind(record.topic_id)
            .bind(&record.topic_name)
            .bind(record.connection_id)
            .bind(&record.connection_name)
            .bind(&record.key)
            .bind(&record.value)
            .bind(record.partition)
            .bind(record.offset)
            .bind(record.timestamp)
            .bind(record.size_bytes)
            .bind(record.classification.as_str())
            .bind(record.bookmarked)
            .bind(&headers)
            .bind(record.archived_at)
            .bind(record.reason.as_str())
            .execute(&mut *tx)
            .await?;

            outcome.archived += 1;
            outcome.bytes_freed += record.size_bytes;
            *per_topic.entry(record.topic_id).or_default() += 1;
        }

        for (topic_id, count) in per_topic {
            sqlx::query("UPDATE topics SET message_count = MAX(0, message_count - ?) WHERE id = ?")
                .bind(count)
                .bind(topic_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn restore_archived_messages(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut restored: u64 = 0;
        let select = format!("SELECT {} FROM archived_messages WHERE id = ?", ARCHIVE_COLUMNS);

        for id in ids {
            let Some(row) = sqlx::query(&select)
                .bind(*id)
                .fetch_optional(&mut *tx)
                .await?
            else {
                continue;
            };
            let archived = archive_from_row(&row)?;

            let topic_exists = sqlx::query("SELECT id FROM topics WHERE id = ?")
                .bind(archived.topic_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !topic_exists {
                debug!(
                    archive_id = archived.id,
                    topic_id = archived.topic_id,
                    "Skipping restore, source topic no longer exists"
                );
                continue;
            }

            let headers = serde_json::to_string(&archived.headers)?;

            sqlx::query(
                "INSERT INTO hot_messages (
                    topic_id, message_key, message_value, partition_id, message_offset,
                    timestamp, size_bytes, classification, bookmarked, headers, received_at
                 )
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(archived.topic_id)
            .bind(&archived.key)
            .bind(&archived.value)
            .bind(archived.partition)
            .bind(archived.offset)
            .bind(archived.timestamp)
            .bind(archived.size_bytes)
            .bind(archived.classification.as_str())
            .bind(archived.bookmarked)
            .bind(&headers)
            .bind(Self::now_ms())
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM archived_messages WHERE id = ?")
                .bind(archived.id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("UPDATE topics SET message_count = message_count + 1 WHERE id = ?")
                .bind(archived.topic_id)
                .execute(&mut *tx)
                .await?;

            restored += 1;
        }

        tx.commit().await?;
        Ok(restored)
    }

    async fn list_archived_messages(&self, topic_id: i64, limit: i64) -> Result<Vec<ArchivedMessage>> {
        let sql = format!(
            "SELECT {} FROM archived_messages WHERE topic_id = ?
             ORDER BY archived_at DESC, id DESC LIMIT ?",
            ARCHIVE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(archive_from_row).collect()
    }

    async fn count_archived_messages(&self, topic_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM archived_messages WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("cnt")?)
    }

    async fn delete_archives_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM archived_messages WHERE archived_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn reset_topic_data(&self, topic_id: i64, delete_archives: bool) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE topics SET message_count = 0 WHERE id = ?")
            .bind(topic_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(MetadataError::TopicNotFound(topic_id));
        }

        let hot_deleted = sqlx::query("DELETE FROM hot_messages WHERE topic_id = ?")
            .bind(topic_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let archives_deleted = if delete_archives {
            sqlx::query("DELETE FROM archived_messages WHERE topic_id = ?")
                .bind(topic_id)
                .execute(&mut *tx)
                .await?
                .rows_affected()
        } else {
            0
        };

        tx.commit().await?;
        Ok((hot_deleted, archives_deleted))
    }

    async fn create_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy> {
        let now = Self::now_ms();
        let scope_id = match policy.scope {
            PolicyScope::Global => None,
            _ => policy.scope_id,
        };

        let result = sqlx::query(
            "INSERT INTO retention_policies (
                name, scope, scope_id, hot_retention_hours, hot_max_messages, hot_max_size_bytes,
                archive_enabled, archive_retention_days, stats_retention_days, auto_purge_enabled,
                exclude_bookmarked, priority, active, created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.name)
        .bind(policy.scope.as_str())
        .bind(scope_id)
        .bind(policy.hot_retention_hours)
        .bind(policy.hot_max_messages)
        .bind(policy.hot_max_size_bytes)
        .bind(policy.archive_enabled)
        .bind(policy.archive_retention_days)
        .bind(policy.stats_retention_days)
        .bind(policy.auto_purge_enabled)
        .bind(policy.exclude_bookmarked)
        .bind(policy.priority)
        .bind(policy.active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::ConflictError("a global retention policy already exists".to_string())
            } else {
                MetadataError::from(e)
            }
        })?;

        Ok(RetentionPolicy {
            id: Some(result.last_insert_rowid()),
            scope_id,
            created_at: now,
            updated_at: now,
            ..policy
        })
    }

    async fn update_policy(&self, policy: RetentionPolicy) -> Result<RetentionPolicy> {
        let id = policy
            .id
            .ok_or_else(|| MetadataError::InvalidValue("policy has no id".to_string()))?;
        let now = Self::now_ms();

        let result = sqlx::query(
            "UPDATE retention_policies SET
                name = ?, hot_retention_hours = ?, hot_max_messages = ?, hot_max_size_bytes = ?,
                archive_enabled = ?, archive_retention_days = ?, stats_retention_days = ?,
                auto_purge_enabled = ?, exclude_bookmarked = ?, priority = ?, active = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&policy.name)
        .bind(policy.hot_retention_hours)
        .bind(policy.hot_max_messages)
        .bind(policy.hot_max_size_bytes)
        .bind(policy.archive_enabled)
        .bind(policy.archive_retention_days)
        .bind(policy.stats_retention_days)
        .bind(policy.auto_purge_enabled)
        .bind(policy.exclude_bookmarked)
        .bind(policy.priority)
        .bind(policy.active)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::PolicyNotFound(id));
        }

        Ok(RetentionPolicy {
            updated_at: now,
            ..policy
        })
    }

    async fn find_active_policy(
        &self,
        scope: PolicyScope,
        scope_id: i64,
    ) -> Result<Option<RetentionPolicy>> {
        let sql = format!(
            "SELECT {} FROM retention_policies
             WHERE scope = ? AND scope_id = ? AND active = 1
             ORDER BY priority DESC, id ASC
             LIMIT 1",
            POLICY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(policy_from_row).transpose()
    }

    async fn get_global_policy(&self) -> Result<Option<RetentionPolicy>> {
        let sql = format!(
            "SELECT {} FROM retention_policies WHERE scope = 'GLOBAL' LIMIT 1",
            POLICY_COLUMNS
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        row.as_ref().map(policy_from_row).transpose()
    }

    async fn ensure_global_policy(&self, default: RetentionPolicy) -> Result<RetentionPolicy> {
        let now = Self::now_ms();

        sqlx::query(
            "INSERT OR IGNORE INTO retention_policies (
                name, scope, scope_id, hot_retention_hours, hot_max_messages, hot_max_size_bytes,
                archive_enabled, archive_retention_days, stats_retention_days, auto_purge_enabled,
                exclude_bookmarked, priority, active, created_at, updated_at
             )
             VALUES (?, 'GLOBAL', NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&default.name)
        .bind(default.hot_retention_hours)
        .bind(default.hot_max_messages)
        .bind(default.hot_max_size_bytes)
        .bind(default.archive_enabled)
        .bind(default.archive_retention_days)
        .bind(default.stats_retention_days)
        .bind(default.auto_purge_enabled)
        .bind(default.exclude_bookmarked)
        .bind(default.priority)
        .bind(default.active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_global_policy().await?.ok_or_else(|| {
            MetadataError::InvalidValue("global policy missing after insert".to_string())
        })
    }

    async fn try_start_job(&self, job_type: JobType, started_at: i64) -> Result<Option<JobLog>> {
        // Single statement, so the existence check and the insert are atomic.
        let result = sqlx::query(
            "INSERT INTO job_logs (job_type, status, started_at)
             SELECT ?, 'STARTED', ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM job_logs WHERE job_type = ? AND status = 'STARTED'
             )",
        )
        .bind(job_type.as_str())
        .bind(started_at)
        .bind(job_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(JobLog {
            id: result.last_insert_rowid(),
            job_type,
            status: JobStatus::Started,
            messages_processed: 0,
            messages_archived: 0,
            messages_deleted: 0,
            bytes_freed: 0,
            started_at,
            finished_at: None,
            duration_ms: None,
            error_message: None,
        }))
    }

    async fn finish_job(
        &self,
        id: i64,
        status: JobStatus,
        counters: JobCounters,
        error_message: Option<String>,
        finished_at: i64,
    ) -> Result<JobLog> {
        if status == JobStatus::Started {
            return Err(MetadataError::InvalidValue(
                "a job cannot be finished as STARTED".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE job_logs SET
                status = ?, messages_processed = ?, messages_archived = ?, messages_deleted = ?,
                bytes_freed = ?, finished_at = ?, duration_ms = MAX(0, ? - started_at),
                error_message = ?
             WHERE id = ? AND status = 'STARTED'",
        )
        .bind(status.as_str())
        .bind(counters.messages_processed)
        .bind(counters.messages_archived)
        .bind(counters.messages_deleted)
        .bind(counters.bytes_freed)
        .bind(finished_at)
        .bind(finished_at)
        .bind(&error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::JobNotFound(id));
        }

        self.get_job(id).await?.ok_or(MetadataError::JobNotFound(id))
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobLog>> {
        let sql = format!("SELECT {} FROM job_logs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, job_type: Option<JobType>, limit: i64) -> Result<Vec<JobLog>> {
        let rows = match job_type {
            Some(job_type) => {
                let sql = format!(
                    "SELECT {} FROM job_logs WHERE job_type = ? ORDER BY id DESC LIMIT ?",
                    JOB_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(job_type.as_str())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {} FROM job_logs ORDER BY id DESC LIMIT ?", JOB_COLUMNS);
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(job_from_row).collect()
    }

    async fn fail_started_jobs(&self, message: &str, finished_at: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_logs SET
                status = 'FAILED', finished_at = ?, duration_ms = MAX(0, ? - started_at),
                error_message = ?
             WHERE status = 'STARTED'",
        )
        .bind(finished_at)
        .bind(finished_at)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_hourly_stat(&self, stat: HourlyStat) -> Result<()> {
        sqlx::query(
            "INSERT INTO hourly_stats (
                topic_id, hour_start, message_count, total_size_bytes, min_size_bytes,
                max_size_bytes, avg_size_bytes, normal_count, error_count, warning_count,
                system_count, messages_per_minute, peak_minute_count, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(topic_id, hour_start) DO UPDATE SET
                message_count = excluded.message_count,
                total_size_bytes = excluded.total_size_bytes,
                min_size_bytes = excluded.min_size_bytes,
                max_size_bytes = excluded.max_size_bytes,
                avg_size_bytes = excluded.avg_size_bytes,
                normal_count = excluded.normal_count,
                error_count = excluded.error_count,
                warning_count = excluded.warning_count,
                system_count = excluded.system_count,
                messages_per_minute = excluded.messages_per_minute,
                peak_minute_count = excluded.peak_minute_count,
                updated_at = excluded.updated_at",
        )
        .bind(stat.topic_id)
        .bind(stat.hour_start)
        .bind(stat.message_count)
        .bind(stat.total_size_bytes)
        .bind(stat.min_size_bytes)
        .bind(stat.max_size_bytes)
        .bind(stat.avg_size_bytes)
        .bind(stat.normal_count)
        .bind(stat.error_count)
        .bind(stat.warning_count)
        .bind(stat.system_count)
        .bind(stat.messages_per_minute)
        .bind(stat.peak_minute_count)
        .bind(stat.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_hourly_stat(&self, topic_id: i64, hour_start: i64) -> Result<Option<HourlyStat>> {
        let sql = format!(
            "SELECT {} FROM hourly_stats WHERE topic_id = ? AND hour_start = ?",
            STAT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(topic_id)
            .bind(hour_start)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(stat_from_row).transpose()
    }

    async fn list_hourly_stats(&self, topic_id: i64) -> Result<Vec<HourlyStat>> {
        let sql = format!(
            "SELECT {} FROM hourly_stats WHERE topic_id = ? ORDER BY hour_start",
            STAT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(stat_from_row).collect()
    }

    async fn delete_hourly_stats_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM hourly_stats WHERE hour_start < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
