//! Per-Topic Throughput Tracking
//!
//! Consumer workers report every non-empty batch here. The tracker keeps a
//! sliding window of samples per registered topic and turns them into
//! records/sec and bytes/sec on demand.
//!
//! ## Window
//!
//! Samples older than the window (default: 60s) are dropped on every write and
//! every snapshot. Rates are computed over the window, or over the time since
//! registration when the topic is younger than the window, so a freshly
//! started worker does not report a diluted rate.
//!
//! ## Usage
//!
//! ```ignore
//! use brokerwatch_agent::throughput::{ThroughputTracker, ThroughputConfig};
//!
//! let tracker = ThroughputTracker::new(ThroughputConfig::default());
//! tracker.register(7, "orders").await;
//! tracker.record_batch(7, 100, 51_200).await;
//!
//! for snapshot in tracker.snapshot_all().await {
//!     tracing::info!(topic_id = snapshot.topic_id, rate = snapshot.records_per_sec, "throughput");
//! }
//! ```

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Configuration for the throughput tracker.
#[derive(Debug, Clone)]
pub struct ThroughputConfig {
    /// Length of the sliding window.
    pub window: Duration,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    records: u64,
    bytes: u64,
}

#[derive(Debug)]
struct TopicWindow {
    topic_name: String,
    registered_at: Instant,
    samples: VecDeque<Sample>,
    total_records: u64,
    total_bytes: u64,
    last_batch_at: Option<i64>,
}

impl TopicWindow {
    fn new(topic_name: &str) -> Self {
        Self {
            topic_name: topic_name.to_string(),
            registered_at: Instant::now(),
            samples: VecDeque::new(),
            total_records: 0,
            total_bytes: 0,
            last_batch_at: None,
        }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Point-in-time throughput of one topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicThroughput {
    pub topic_id: i64,
    pub topic_name: String,
    pub records_per_sec: f64,
    pub bytes_per_sec: f64,
    /// Records inside the current window
    pub window_records: u64,
    /// Bytes inside the current window
    pub window_bytes: u64,
    /// Records since registration
    pub total_records: u64,
    /// Bytes since registration
    pub total_bytes: u64,
    /// Wall-clock time of the last batch (milliseconds since epoch)
    pub last_batch_at: Option<i64>,
}

/// Tracks sliding-window throughput for registered topics.
pub struct ThroughputTracker {
    topics: RwLock<HashMap<i64, TopicWindow>>,
    config: ThroughputConfig,
}

impl ThroughputTracker {
    pub fn new(config: ThroughputConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Start tracking a topic. Re-registering resets its counters.
    pub async fn register(&self, topic_id: i64, topic_name: &str) {
        let mut topics = self.topics.write().await;
        topics.insert(topic_id, TopicWindow::new(topic_name));
    }

    /// Stop tracking a topic. Unknown ids are ignored.
    pub async fn unregister(&self, topic_id: i64) {
        self.topics.write().await.remove(&topic_id);
    }

    /// Record a consumed batch. Ignored for unregistered topics.
    pub async fn record_batch(&self, topic_id: i64, records: u64, bytes: u64) {
        let now = Instant::now();
        let mut topics = self.topics.write().await;

        let Some(window) = topics.get_mut(&topic_id) else {
            return;
        };

        window.evict(now, self.config.window);
        window.samples.push_back(Sample {
            at: now,
            records,
            bytes,
        });
        window.total_records += records;
        window.total_bytes += bytes;
        window.last_batch_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Current throughput of one topic, `None` if it is not registered.
    pub async fn snapshot(&self, topic_id: i64) -> Option<TopicThroughput> {
        let now = Instant::now();
        let mut topics = self.topics.write().await;

        topics
            .get_mut(&topic_id)
            .map(|window| self.build_snapshot(topic_id, window, now))
    }

    /// Current throughput of every registered topic, ordered by topic id.
    pub async fn snapshot_all(&self) -> Vec<TopicThroughput> {
        let now = Instant::now();
        let mut topics = self.topics.write().await;

        let mut snapshots: Vec<TopicThroughput> = topics
            .iter_mut()
            .map(|(topic_id, window)| self.build_snapshot(*topic_id, window, now))
            .collect();
        snapshots.sort_by_key(|s| s.topic_id);
        snapshots
    }

    /// Number of registered topics.
    pub async fn tracked_count(&self) -> usize {
        self.topics.read().await.len()
    }

    pub fn config(&self) -> &ThroughputConfig {
        &self.config
    }

    fn build_snapshot(&self, topic_id: i64, window: &mut TopicWindow, now: Instant) -> TopicThroughput {
        window.evict(now, self.config.window);

        let window_records: u64 = window.samples.iter().map(|s| s.records).sum();
        let window_bytes: u64 = window.samples.iter().map(|s| s.bytes).sum();

        // Avoid division by near-zero right after registration.
        let span = now
            .duration_since(window.registered_at)
            .min(self.config.window)
            .as_secs_f64()
            .max(1.0);

        TopicThroughput {
            topic_id,
            topic_name: window.topic_name.clone(),
            records_per_sec: window_records as f64 / span,
            bytes_per_sec: window_bytes as f64 / span,
            window_records,
            window_bytes,
            total_records: window.total_records,
            total_bytes: window.total_bytes,
            last_batch_at: window.last_batch_at,
        }
    }
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new(ThroughputConfig::default())
    }
}
