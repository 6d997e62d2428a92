//! Broker Client Seam
//!
//! The broker wire protocol is outside this crate. The orchestrator only needs
//! four primitives from it: subscribe, poll, describe and close. A production
//! deployment plugs a real client in behind [`BrokerClient`]; tests use
//! scripted mocks.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Failures surfaced by a broker client.
///
/// Typed variants cover the conditions the classifier cares about. Anything
/// else arrives as free text in `Protocol` or `Other`.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Leader not available for {topic}")]
    LeaderNotAvailable { topic: String },

    #[error("Not leader for partition {partition}")]
    NotLeaderForPartition { partition: i32 },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Disconnected from broker: {0}")]
    Disconnected(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

/// One record pulled from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerRecord {
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp (milliseconds since epoch)
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(String, Bytes)>,
}

impl BrokerRecord {
    /// Payload size: key plus value bytes.
    pub fn size_bytes(&self) -> u64 {
        let key = self.key.as_ref().map(|k| k.len()).unwrap_or(0);
        let value = self.value.as_ref().map(|v| v.len()).unwrap_or(0);
        (key + value) as u64
    }

    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    pub fn value_str(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// First header with this name (case-insensitive), decoded lossily.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }
}

/// Topic metadata returned by `describe_topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescription {
    pub name: String,
    pub partitions: u32,
}

/// Connection-level broker operations.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open a subscription to `topic` as a member of consumer group `group_id`.
    async fn subscribe(
        &self,
        bootstrap_servers: &str,
        topic: &str,
        group_id: &str,
    ) -> BrokerResult<Box<dyn Subscription>>;

    /// Fetch topic metadata.
    async fn describe_topic(
        &self,
        bootstrap_servers: &str,
        topic: &str,
    ) -> BrokerResult<TopicDescription>;
}

/// An open subscription, owned by exactly one consumer worker.
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next batch. An empty batch is not an error.
    async fn poll(&mut self, timeout: Duration) -> BrokerResult<Vec<BrokerRecord>>;

    /// Leave the group and release broker resources.
    async fn close(&mut self) -> BrokerResult<()>;
}
