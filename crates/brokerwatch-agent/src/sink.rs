//! Message Persistence
//!
//! Consumer workers hand every record to a [`MessageSink`]. The default
//! [`StoreMessageSink`] classifies the record, writes it to hot storage,
//! bumps the topic counters and publishes monitor events.
//!
//! ## Classification
//!
//! - `SYSTEM`: internal topics or keys (`__` prefix)
//! - `ERROR` / `WARNING`: from a `level` (or `severity`) header, else from
//!   keywords in the value
//! - `NORMAL`: everything else

use async_trait::async_trait;
use brokerwatch_metadata::{
    HotMessage, MessageClassification, MetadataStore, MonitoredTopic, NewHotMessage,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::BrokerRecord;
use crate::error::Result;
use crate::events::{EventSink, MonitorEvent};

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Persist one record and return its stored form.
    async fn save(&self, topic: &MonitoredTopic, record: &BrokerRecord) -> Result<HotMessage>;
}

const ERROR_LEVELS: &[&str] = &["error", "err", "fatal", "critical", "crit", "severe"];
const WARNING_LEVELS: &[&str] = &["warn", "warning"];
const ERROR_KEYWORDS: &[&str] = &["error", "exception", "fatal", "panic"];
const WARNING_KEYWORDS: &[&str] = &["warn"];

/// Assign a classification to an inbound record.
pub fn classify_message(topic_name: &str, record: &BrokerRecord) -> MessageClassification {
    let system_key = record
        .key
        .as_ref()
        .map(|k| k.starts_with(b"__"))
        .unwrap_or(false);
    if topic_name.starts_with("__") || system_key {
        return MessageClassification::System;
    }

    if let Some(level) = record.header("level").or_else(|| record.header("severity")) {
        let level = level.trim().to_lowercase();
        if ERROR_LEVELS.contains(&level.as_str()) {
            return MessageClassification::Error;
        }
        if WARNING_LEVELS.contains(&level.as_str()) {
            return MessageClassification::Warning;
        }
        return MessageClassification::Normal;
    }

    if let Some(value) = record.value_str() {
        let value = value.to_lowercase();
        if ERROR_KEYWORDS.iter().any(|k| value.contains(k)) {
            return MessageClassification::Error;
        }
        if WARNING_KEYWORDS.iter().any(|k| value.contains(k)) {
            return MessageClassification::Warning;
        }
    }

    MessageClassification::Normal
}

/// Persists records into the metadata store's hot storage.
pub struct StoreMessageSink {
    store: Arc<dyn MetadataStore>,
    events: Arc<dyn EventSink>,
}

impl StoreMessageSink {
    pub fn new(store: Arc<dyn MetadataStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }
}

#[async_trait]
impl MessageSink for StoreMessageSink {
    async fn save(&self, topic: &MonitoredTopic, record: &BrokerRecord) -> Result<HotMessage> {
        let headers: HashMap<String, String> = record
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect();

        let message = self
            .store
            .insert_hot_message(NewHotMessage {
                topic_id: topic.id,
                key: record.key_str(),
                value: record.value_str(),
                partition: record.partition,
                offset: record.offset,
                timestamp: record.timestamp,
                size_bytes: record.size_bytes() as i64,
                classification: classify_message(&topic.name, record),
                headers,
            })
            .await?;

        self.events.publish(MonitorEvent::TopicUpdated {
            topic_id: topic.id,
            last_message_at: message.timestamp,
        });
        self.events.publish(MonitorEvent::NewMessage {
            topic_id: topic.id,
            message: message.clone(),
        });

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(key: Option<&'static str>, value: &'static str, headers: Vec<(&str, &'static str)>) -> BrokerRecord {
        BrokerRecord {
            partition: 0,
            offset: 0,
            timestamp: 0,
            key: key.map(|k| Bytes::from_static(k.as_bytes())),
            value: Some(Bytes::from_static(value.as_bytes())),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), Bytes::from_static(v.as_bytes())))
                .collect(),
        }
    }

    #[test]
    fn test_system_by_topic_or_key() {
        assert_eq!(
            classify_message("__consumer_offsets", &record(None, "x", vec![])),
            MessageClassification::System
        );
        assert_eq!(
            classify_message("orders", &record(Some("__heartbeat"), "x", vec![])),
            MessageClassification::System
        );
    }

    #[test]
    fn test_level_header_wins_over_value() {
        assert_eq!(
            classify_message("orders", &record(None, "all fine", vec![("level", "ERROR")])),
            MessageClassification::Error
        );
        assert_eq!(
            classify_message("orders", &record(None, "an error here", vec![("Severity", "warn")])),
            MessageClassification::Warning
        );
        assert_eq!(
            classify_message("orders", &record(None, "an error here", vec![("level", "info")])),
            MessageClassification::Normal
        );
    }

    #[test]
    fn test_value_keywords() {
        assert_eq!(
            classify_message("orders", &record(None, "NullPointerException at line 3", vec![])),
            MessageClassification::Error
        );
        assert_eq!(
            classify_message("orders", &record(None, "Warning: disk 90% full", vec![])),
            MessageClassification::Warning
        );
        assert_eq!(
            classify_message("orders", &record(None, "{\"id\": 1}", vec![])),
            MessageClassification::Normal
        );
    }
}
