//! Topic Directory
//!
//! Source of truth for which topics should have a live consumer.

use async_trait::async_trait;
use brokerwatch_metadata::{MetadataStore, MonitoredTopic};
use std::sync::Arc;

use crate::error::Result;

#[async_trait]
pub trait TopicDirectory: Send + Sync {
    /// Topics flagged for live ingestion, with their connection info.
    async fn monitored_topics(&self) -> Result<Vec<MonitoredTopic>>;
}

/// Reads the monitored set from the metadata store.
pub struct StoreTopicDirectory {
    store: Arc<dyn MetadataStore>,
}

impl StoreTopicDirectory {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TopicDirectory for StoreTopicDirectory {
    async fn monitored_topics(&self) -> Result<Vec<MonitoredTopic>> {
        Ok(self.store.list_monitored_topics().await?)
    }
}
