//! Archival Engine
//!
//! Moves hot messages into archive storage.
//!
//! ## Retention Run ([`ArchivalEngine::archive_old_messages`])
//!
//! For every topic:
//!
//! 1. Resolve the effective policy. Skip the topic if archiving is disabled.
//! 2. `cutoff = now - hot_retention_hours`
//! 3. Fetch up to `batch_size` hot rows with `timestamp < cutoff` (without
//!    bookmarked rows when the policy excludes them) and archive them with
//!    reason RETENTION. Repeat until a short batch.
//! 4. Capacity pass: while the topic is over `hot_max_messages` or
//!    `hot_max_size_bytes`, archive its oldest rows with reason CLEANUP.
//!
//! Each batch is one store transaction (insert archives, delete originals,
//! decrement the topic counter). A failure ends the run and fails the job;
//! batches committed before it stay committed.

use brokerwatch_metadata::{
    ArchiveOutcome, ArchiveReason, HotMessage, JobCounters, JobLog, JobType, MetadataStore,
    MonitoredTopic, NewArchivedMessage, RetentionPolicy,
};
use brokerwatch_observability::metrics::{BYTES_FREED_TOTAL, MESSAGES_ARCHIVED_TOTAL};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::error::{Result, RetentionError};
use crate::job::JobRunner;
use crate::resolver::PolicyResolver;
use crate::{now_ms, HOUR_MS};

/// Rows removed by [`ArchivalEngine::reset_topic`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub hot_deleted: u64,
    pub archives_deleted: u64,
}

pub struct ArchivalEngine {
    store: Arc<dyn MetadataStore>,
    resolver: PolicyResolver,
    jobs: JobRunner,
    config: MaintenanceConfig,
}

impl ArchivalEngine {
    pub fn new(store: Arc<dyn MetadataStore>, config: MaintenanceConfig) -> Self {
        Self {
            resolver: PolicyResolver::new(store.clone()),
            jobs: JobRunner::new(store.clone()),
            store,
            config,
        }
    }

    /// Scheduled ARCHIVE job over every topic.
    ///
    /// Returns `None` when an ARCHIVE job is already running.
    pub async fn archive_old_messages(&self) -> Result<Option<JobLog>> {
        let Some(mut job) = self.jobs.begin(JobType::Archive).await? else {
            return Ok(None);
        };

        let outcome = self.archive_all_topics(job.counters_mut()).await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn archive_all_topics(&self, counters: &mut JobCounters) -> Result<()> {
        let topics = self.store.list_topics().await?;

        for topic in &topics {
            let policy = self
                .resolver
                .effective_policy(topic.id, topic.connection_id)
                .await?;

            if !policy.archive_enabled {
                debug!(topic_id = topic.id, policy = %policy.name, "Archiving disabled, skipping topic");
                continue;
            }

            let archived = self.archive_expired(topic, &policy, counters).await?;
            let cleaned = self.enforce_capacity(topic, &policy, counters).await?;

            if archived > 0 || cleaned > 0 {
                info!(
                    topic_id = topic.id,
                    topic = %topic.name,
                    policy = %policy.name,
                    archived,
                    over_capacity = cleaned,
                    "Archived hot messages"
                );
            }
        }

        Ok(())
    }

    /// Archive rows older than the policy's hot retention. Returns rows archived.
    async fn archive_expired(
        &self,
        topic: &MonitoredTopic,
        policy: &RetentionPolicy,
        counters: &mut JobCounters,
    ) -> Result<u64> {
        let batch_size = self.config.batch_size();
        let cutoff = now_ms() - policy.hot_retention_hours.max(0) * HOUR_MS;
        let mut archived = 0;

        loop {
            let batch = self
                .store
                .list_hot_messages_older_than(
                    topic.id,
                    cutoff,
                    policy.exclude_bookmarked,
                    batch_size,
                )
                .await?;
            if batch.is_empty() {
                break;
            }

            let full = batch.len() as i64 >= batch_size;
            let outcome = self
                .commit(topic, &batch, ArchiveReason::Retention, counters)
                .await?;
            archived += outcome.archived;

            if !full || outcome.archived == 0 {
                break;
            }
        }

        Ok(archived)
    }

    /// Archive the oldest rows while the topic exceeds its caps. Returns rows archived.
    async fn enforce_capacity(
        &self,
        topic: &MonitoredTopic,
        policy: &RetentionPolicy,
        counters: &mut JobCounters,
    ) -> Result<u64> {
        if policy.hot_max_messages.is_none() && policy.hot_max_size_bytes.is_none() {
            return Ok(0);
        }

        let mut archived = 0;
        loop {
            let usage = self.store.topic_hot_usage(topic.id).await?;
            let excess_messages = policy
                .hot_max_messages
                .map(|max| usage.message_count - max.max(0))
                .unwrap_or(0)
                .max(0);
            let excess_bytes = policy
                .hot_max_size_bytes
                .map(|max| usage.total_size_bytes - max.max(0))
                .unwrap_or(0)
                .max(0);

            if excess_messages == 0 && excess_bytes == 0 {
                break;
            }

            let candidates = self
                .store
                .list_oldest_hot_messages(
                    topic.id,
                    policy.exclude_bookmarked,
                    self.config.batch_size(),
                )
                .await?;

            let overflow = select_overflow(&candidates, excess_messages, excess_bytes);
            if overflow.is_empty() {
                debug!(topic_id = topic.id, "Over capacity but nothing left to archive");
                break;
            }

            let outcome = self
                .commit(topic, overflow, ArchiveReason::Cleanup, counters)
                .await?;
            archived += outcome.archived;

            if outcome.archived == 0 {
                break;
            }
        }

        Ok(archived)
    }

    /// Manual ARCHIVE job moving every hot row of one topic.
    ///
    /// # Errors
    ///
    /// - `TopicNotFound`: checked before the job is opened
    pub async fn archive_topic(&self, topic_id: i64) -> Result<Option<JobLog>> {
        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .ok_or(RetentionError::TopicNotFound(topic_id))?;

        let Some(mut job) = self.jobs.begin(JobType::Archive).await? else {
            return Ok(None);
        };

        let outcome = self.archive_whole_topic(&topic, job.counters_mut()).await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn archive_whole_topic(
        &self,
        topic: &MonitoredTopic,
        counters: &mut JobCounters,
    ) -> Result<()> {
        let mut archived = 0;

        loop {
            let batch = self
                .store
                .list_oldest_hot_messages(topic.id, false, self.config.batch_size())
                .await?;
            if batch.is_empty() {
                break;
            }

            let outcome = self
                .commit(topic, &batch, ArchiveReason::Manual, counters)
                .await?;
            archived += outcome.archived;

            if outcome.archived == 0 {
                break;
            }
        }

        info!(topic_id = topic.id, topic = %topic.name, archived, "Manually archived topic");
        Ok(())
    }

    /// Manual ARCHIVE job moving the given hot messages. Unknown ids are skipped.
    pub async fn archive_specific(&self, ids: &[i64]) -> Result<Option<JobLog>> {
        let Some(mut job) = self.jobs.begin(JobType::Archive).await? else {
            return Ok(None);
        };

        let outcome = self.archive_ids(ids, job.counters_mut()).await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn archive_ids(&self, ids: &[i64], counters: &mut JobCounters) -> Result<()> {
        let mut topics: HashMap<i64, MonitoredTopic> = HashMap::new();
        let chunk_size = self.config.batch_size() as usize;

        for chunk in ids.chunks(chunk_size) {
            let messages = self.store.get_hot_messages(chunk).await?;
            if messages.len() < chunk.len() {
                debug!(
                    requested = chunk.len(),
                    found = messages.len(),
                    "Some messages were not in hot storage"
                );
            }

            let archived_at = now_ms();
            let mut records = Vec::with_capacity(messages.len());
            for message in &messages {
                if !topics.contains_key(&message.topic_id) {
                    match self.store.get_topic(message.topic_id).await? {
                        Some(topic) => {
                            topics.insert(topic.id, topic);
                        }
                        None => {
                            warn!(
                                message_id = message.id,
                                topic_id = message.topic_id,
                                "Topic of message disappeared, skipping"
                            );
                            continue;
                        }
                    }
                }
                if let Some(topic) = topics.get(&message.topic_id) {
                    records.push(NewArchivedMessage::from_hot(
                        message,
                        topic,
                        ArchiveReason::Manual,
                        archived_at,
                    ));
                }
            }

            self.commit_records(records, messages.len(), counters).await?;
        }

        Ok(())
    }

    async fn commit(
        &self,
        topic: &MonitoredTopic,
        messages: &[HotMessage],
        reason: ArchiveReason,
        counters: &mut JobCounters,
    ) -> Result<ArchiveOutcome> {
        let archived_at = now_ms();
        let records = messages
            .iter()
            .map(|m| NewArchivedMessage::from_hot(m, topic, reason, archived_at))
            .collect();

        self.commit_records(records, messages.len(), counters).await
    }

    async fn commit_records(
        &self,
        records: Vec<NewArchivedMessage>,
        processed: usize,
        counters: &mut JobCounters,
    ) -> Result<ArchiveOutcome> {
        let outcome = self.store.archive_messages(records).await?;

        counters.messages_processed += processed as i64;
        counters.messages_archived += outcome.archived as i64;
        counters.bytes_freed += outcome.bytes_freed;

        MESSAGES_ARCHIVED_TOTAL.inc_by(outcome.archived);
        BYTES_FREED_TOTAL.inc_by(outcome.bytes_freed.max(0) as u64);

        debug!(
            processed,
            archived = outcome.archived,
            bytes_freed = outcome.bytes_freed,
            "Committed archive batch"
        );
        Ok(outcome)
    }

    /// Delete a topic's hot rows, and its archives when asked, then zero its counter.
    ///
    /// # Errors
    ///
    /// - `TopicNotFound`: unknown topic
    pub async fn reset_topic(&self, topic_id: i64, delete_archives: bool) -> Result<ResetSummary> {
        let (hot_deleted, archives_deleted) = self
            .store
            .reset_topic_data(topic_id, delete_archives)
            .await?;

        info!(
            topic_id,
            hot_deleted,
            archives_deleted,
            delete_archives,
            "Reset topic data"
        );

        Ok(ResetSummary {
            hot_deleted,
            archives_deleted,
        })
    }

    /// Set or clear a hot message's bookmark.
    ///
    /// # Errors
    ///
    /// - `MessageNotFound`: no hot message with this id
    pub async fn bookmark_message(&self, message_id: i64, bookmarked: bool) -> Result<HotMessage> {
        let message = self.store.set_bookmark(message_id, bookmarked).await?;
        debug!(message_id, bookmarked, "Updated bookmark");
        Ok(message)
    }

    /// Move archived messages back into hot storage. Returns how many moved.
    pub async fn restore_archived(&self, archive_ids: &[i64]) -> Result<u64> {
        let restored = self.store.restore_archived_messages(archive_ids).await?;
        info!(requested = archive_ids.len(), restored, "Restored archived messages");
        Ok(restored)
    }
}

/// Oldest prefix of `candidates` that removes at least `excess_messages`
/// rows and `excess_bytes` bytes, or all of them if that is not enough.
pub(crate) fn select_overflow(
    candidates: &[HotMessage],
    excess_messages: i64,
    excess_bytes: i64,
) -> &[HotMessage] {
    let mut count: i64 = 0;
    let mut bytes: i64 = 0;

    for message in candidates {
        if count >= excess_messages && bytes >= excess_bytes {
            break;
        }
        count += 1;
        bytes += message.size_bytes;
    }

    &candidates[..count as usize]
}
