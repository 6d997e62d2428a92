//! Retention Policy Resolution
//!
//! The effective policy of a topic is, in order:
//!
//! 1. the highest-priority active TOPIC policy for the topic
//! 2. the highest-priority active CONNECTION policy for its connection
//! 3. the global policy
//! 4. [`default_policy`], which is never persisted by resolution
//!
//! Nothing is cached. Archival, purge and stats resolve again on every run,
//! so policy edits take effect on the next tick.

use brokerwatch_metadata::{MetadataStore, PolicyScope, RetentionPolicy};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Built-in policy used when no global policy has been stored.
///
/// 24h in hot storage, 30 days in archive, 90 days of hourly stats.
pub fn default_policy() -> RetentionPolicy {
    RetentionPolicy {
        id: None,
        name: "default".to_string(),
        scope: PolicyScope::Global,
        scope_id: None,
        hot_retention_hours: 24,
        hot_max_messages: None,
        hot_max_size_bytes: None,
        archive_enabled: true,
        archive_retention_days: 30,
        stats_retention_days: 90,
        auto_purge_enabled: true,
        exclude_bookmarked: true,
        priority: 0,
        active: true,
        created_at: 0,
        updated_at: 0,
    }
}

#[derive(Clone)]
pub struct PolicyResolver {
    store: Arc<dyn MetadataStore>,
}

impl PolicyResolver {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// The policy that applies to a topic.
    pub async fn effective_policy(
        &self,
        topic_id: i64,
        connection_id: Option<i64>,
    ) -> Result<RetentionPolicy> {
        if let Some(policy) = self
            .store
            .find_active_policy(PolicyScope::Topic, topic_id)
            .await?
        {
            debug!(topic_id, policy = %policy.name, "Resolved topic policy");
            return Ok(policy);
        }

        if let Some(connection_id) = connection_id {
            if let Some(policy) = self
                .store
                .find_active_policy(PolicyScope::Connection, connection_id)
                .await?
            {
                debug!(topic_id, connection_id, policy = %policy.name, "Resolved connection policy");
                return Ok(policy);
            }
        }

        match self.store.get_global_policy().await? {
            Some(policy) => Ok(policy),
            None => Ok(default_policy()),
        }
    }

    /// The stored global policy, created from [`default_policy`] if missing.
    pub async fn global_policy(&self) -> Result<RetentionPolicy> {
        Ok(self.store.ensure_global_policy(default_policy()).await?)
    }
}
