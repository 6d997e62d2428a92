//! Metadata Type Definitions
//!
//! This module defines the records persisted by the metadata store.
//!
//! ## Types Overview
//!
//! ### MonitoredTopic
//! A broker topic known to the monitoring application. Carries the connection
//! information the orchestrator needs to subscribe, plus running counters that
//! ingestion bumps and archival/reset decrease.
//!
//! ### HotMessage / ArchivedMessage
//! One ingested record in hot storage, and its denormalized copy in archive
//! storage. Archive rows carry topic and connection names so they stay
//! self-describing after the source topic is deleted.
//!
//! ### RetentionPolicy
//! Scoped (global/connection/topic) tiering rules. See the retention crate for
//! resolution.
//!
//! ### JobLog / HourlyStat
//! Audit record of one maintenance run, and per-topic per-hour usage bucket.
//!
//! ## Design Decisions
//!
//! - Timestamps are i64 (milliseconds since epoch)
//! - Enums are stored as upper-case strings and parsed back with `FromStr`
//! - Headers are a JSON object column

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MetadataError;

/// A broker connection (cluster) that topics belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    /// Comma-separated broker addresses
    pub bootstrap_servers: String,
    pub created_at: i64,
}

/// A topic tracked by the monitoring application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTopic {
    pub id: i64,
    pub name: String,

    /// Owning connection (None when the topic was registered without one)
    pub connection_id: Option<i64>,

    /// Denormalized from the connection row
    pub connection_name: Option<String>,

    /// Denormalized from the connection row
    pub bootstrap_servers: Option<String>,

    /// Whether a consumer worker should be running for this topic
    pub monitored: bool,

    /// Number of messages currently in hot storage
    pub message_count: i64,

    /// Timestamp of the last ingested message
    pub last_message_at: Option<i64>,

    pub created_at: i64,
}

impl MonitoredTopic {
    /// Connection details required to subscribe, if the topic has them.
    pub fn connection(&self) -> Option<(i64, &str)> {
        match (self.connection_id, self.bootstrap_servers.as_deref()) {
            (Some(id), Some(servers)) if !servers.trim().is_empty() => Some((id, servers)),
            _ => None,
        }
    }
}

/// Classification assigned to a message at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageClassification {
    #[default]
    Normal,
    Error,
    Warning,
    System,
}

impl MessageClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClassification::Normal => "NORMAL",
            MessageClassification::Error => "ERROR",
            MessageClassification::Warning => "WARNING",
            MessageClassification::System => "SYSTEM",
        }
    }
}

impl fmt::Display for MessageClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageClassification {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(MessageClassification::Normal),
            "ERROR" => Ok(MessageClassification::Error),
            "WARNING" => Ok(MessageClassification::Warning),
            "SYSTEM" => Ok(MessageClassification::System),
            other => Err(MetadataError::InvalidValue(format!(
                "unknown message classification '{}'",
                other
            ))),
        }
    }
}

/// A record to be inserted into hot storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHotMessage {
    pub topic_id: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp of the record
    pub timestamp: i64,
    pub size_bytes: i64,
    pub classification: MessageClassification,
    pub headers: HashMap<String, String>,
}

/// One ingested record in hot storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotMessage {
    pub id: i64,
    pub topic_id: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub size_bytes: i64,
    pub classification: MessageClassification,
    pub bookmarked: bool,
    pub headers: HashMap<String, String>,
    /// When the record was persisted by the sink
    pub received_at: i64,
}

/// Why a message was moved to archive storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveReason {
    /// Older than the policy's hot retention
    Retention,
    /// Operator-triggered
    Manual,
    /// Hot storage capacity limit exceeded
    Cleanup,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::Retention => "RETENTION",
            ArchiveReason::Manual => "MANUAL",
            ArchiveReason::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveReason {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETENTION" => Ok(ArchiveReason::Retention),
            "MANUAL" => Ok(ArchiveReason::Manual),
            "CLEANUP" => Ok(ArchiveReason::Cleanup),
            other => Err(MetadataError::InvalidValue(format!(
                "unknown archive reason '{}'",
                other
            ))),
        }
    }
}

/// An archive row to be written. Built from a hot message by the archival engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArchivedMessage {
    /// Id of the hot row being archived; the hot row is deleted in the same transaction
    pub original_id: i64,
    pub topic_id: i64,
    pub topic_name: String,
    pub connection_id: Option<i64>,
    pub connection_name: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub size_bytes: i64,
    pub classification: MessageClassification,
    pub bookmarked: bool,
    pub headers: HashMap<String, String>,
    pub archived_at: i64,
    pub reason: ArchiveReason,
}

impl NewArchivedMessage {
    /// Denormalize a hot message into an archive row.
    pub fn from_hot(
        message: &HotMessage,
        topic: &MonitoredTopic,
        reason: ArchiveReason,
        archived_at: i64,
    ) -> Self {
        Self {
            original_id: message.id,
            topic_id: message.topic_id,
            topic_name: topic.name.clone(),
            connection_id: topic.connection_id,
            connection_name: topic.connection_name.clone(),
            key: message.key.clone(),
            value: message.value.clone(),
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            size_bytes: message.size_bytes,
            classification: message.classification,
            bookmarked: message.bookmarked,
            headers: message.headers.clone(),
            archived_at,
            reason,
        }
    }
}

/// A message in archive storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    pub id: i64,
    pub original_id: i64,
    pub topic_id: i64,
    pub topic_name: String,
    pub connection_id: Option<i64>,
    pub connection_name: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub size_bytes: i64,
    pub classification: MessageClassification,
    pub bookmarked: bool,
    pub headers: HashMap<String, String>,
    pub archived_at: i64,
    pub reason: ArchiveReason,
}

/// Result of moving one batch into archive storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    /// Archive rows written (hot rows that were already gone are skipped)
    pub archived: u64,
    /// Sum of `size_bytes` over the written rows
    pub bytes_freed: i64,
}

/// Hot storage usage of a single topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicUsage {
    pub message_count: i64,
    pub total_size_bytes: i64,
}

/// Scope a retention policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyScope {
    Global,
    Connection,
    Topic,
}

impl PolicyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyScope::Global => "GLOBAL",
            PolicyScope::Connection => "CONNECTION",
            PolicyScope::Topic => "TOPIC",
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyScope {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GLOBAL" => Ok(PolicyScope::Global),
            "CONNECTION" => Ok(PolicyScope::Connection),
            "TOPIC" => Ok(PolicyScope::Topic),
            other => Err(MetadataError::InvalidValue(format!(
                "unknown policy scope '{}'",
                other
            ))),
        }
    }
}

/// Retention and tiering rules for a scope.
///
/// `id` is `None` for a policy that only exists in memory (the built-in
/// default returned when nothing is configured).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: Option<i64>,
    pub name: String,
    pub scope: PolicyScope,
    /// Connection id or topic id, depending on scope; None for global
    pub scope_id: Option<i64>,
    /// Messages older than this move to archive storage
    pub hot_retention_hours: i64,
    /// Cap on the number of hot messages per topic
    pub hot_max_messages: Option<i64>,
    /// Cap on the total hot bytes per topic
    pub hot_max_size_bytes: Option<i64>,
    pub archive_enabled: bool,
    pub archive_retention_days: i64,
    pub stats_retention_days: i64,
    pub auto_purge_enabled: bool,
    /// Keep bookmarked messages in hot storage during retention archiving
    pub exclude_bookmarked: bool,
    /// Higher wins within a scope
    pub priority: i32,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Kind of maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Archive,
    PurgeArchive,
    StatsAggregate,
    StatsCleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Archive => "ARCHIVE",
            JobType::PurgeArchive => "PURGE_ARCHIVE",
            JobType::StatsAggregate => "STATS_AGGREGATE",
            JobType::StatsCleanup => "STATS_CLEANUP",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ARCHIVE" => Ok(JobType::Archive),
            "PURGE_ARCHIVE" => Ok(JobType::PurgeArchive),
            "STATS_AGGREGATE" => Ok(JobType::StatsAggregate),
            "STATS_CLEANUP" => Ok(JobType::StatsCleanup),
            other => Err(MetadataError::InvalidValue(format!(
                "unknown job type '{}'",
                other
            ))),
        }
    }
}

/// Job lifecycle: STARTED, then exactly one of COMPLETED or FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "STARTED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(JobStatus::Started),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(MetadataError::InvalidValue(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// Counters accumulated while a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub messages_processed: i64,
    pub messages_archived: i64,
    pub messages_deleted: i64,
    pub bytes_freed: i64,
}

/// Audit record of one maintenance job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub messages_processed: i64,
    pub messages_archived: i64,
    pub messages_deleted: i64,
    pub bytes_freed: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl JobLog {
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            messages_processed: self.messages_processed,
            messages_archived: self.messages_archived,
            messages_deleted: self.messages_deleted,
            bytes_freed: self.bytes_freed,
        }
    }
}

/// Usage of one topic during one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyStat {
    pub topic_id: i64,
    /// Start of the hour (milliseconds, aligned to the hour)
    pub hour_start: i64,
    pub message_count: i64,
    pub total_size_bytes: i64,
    pub min_size_bytes: i64,
    pub max_size_bytes: i64,
    pub avg_size_bytes: f64,
    pub normal_count: i64,
    pub error_count: i64,
    pub warning_count: i64,
    pub system_count: i64,
    /// Average messages per minute across the hour
    pub messages_per_minute: f64,
    /// Busiest single minute of the hour
    pub peak_minute_count: i64,
    pub updated_at: i64,
}
