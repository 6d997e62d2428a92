//! Consumer Worker
//!
//! One worker owns one subscription for one monitored topic and runs on its
//! own tokio task, so a stuck or failing topic never blocks another.
//!
//! ## Lifecycle
//!
//! ```text
//! RUNNING ──(stop signal | error ceiling)──► STOPPING ──(subscription closed)──► STOPPED
//! ```
//!
//! ## Loop
//!
//! 1. Race `poll(timeout)` against the stop signal
//! 2. Non-empty batch: reset the consecutive-error counter, record throughput,
//!    hand every record to the sink independently
//! 3. Poll failure: classify, log (auth at error, others at warn), bump the
//!    counter. At the ceiling, exit. Otherwise back off, interruptible by stop.
//!
//! The subscription is closed exactly once, on every exit path.

use brokerwatch_metadata::MonitoredTopic;
use brokerwatch_observability::metrics::{
    CONSUMER_ERRORS_TOTAL, CONSUMER_RECORDS_TOTAL, RECORD_PERSIST_FAILURES_TOTAL,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerRecord, Subscription};
use crate::classifier::classify;
use crate::config::OrchestratorConfig;
use crate::sink::MessageSink;
use crate::throughput::ThroughputTracker;

const STATE_RUNNING: u8 = 0;
const STATE_STOPPING: u8 = 1;
const STATE_STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_RUNNING => WorkerState::Running,
            STATE_STOPPING => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Why a worker's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop signal received (or its sender dropped)
    Stopped,
    /// Consecutive-error ceiling reached
    ErrorCeiling,
}

/// State a worker shares with the orchestrator for introspection.
#[derive(Debug, Default)]
pub struct WorkerShared {
    state: AtomicU8,
    consecutive_errors: AtomicU32,
    records_persisted: AtomicU64,
    persist_failures: AtomicU64,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    pub fn records_persisted(&self) -> u64 {
        self.records_persisted.load(Ordering::Relaxed)
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

/// Timing and limits a worker runs with.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
    pub max_consecutive_errors: u32,
    pub max_error_message_len: usize,
}

impl From<&OrchestratorConfig> for WorkerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            error_backoff: config.error_backoff(),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            max_error_message_len: config.max_error_message_len,
        }
    }
}

pub struct ConsumerWorker {
    topic: MonitoredTopic,
    subscription: Box<dyn Subscription>,
    sink: Arc<dyn MessageSink>,
    throughput: Arc<ThroughputTracker>,
    config: WorkerConfig,
    shared: Arc<WorkerShared>,
    stop_rx: watch::Receiver<bool>,
}

impl ConsumerWorker {
    pub fn new(
        topic: MonitoredTopic,
        subscription: Box<dyn Subscription>,
        sink: Arc<dyn MessageSink>,
        throughput: Arc<ThroughputTracker>,
        config: WorkerConfig,
        shared: Arc<WorkerShared>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic,
            subscription,
            sink,
            throughput,
            config,
            shared,
            stop_rx,
        }
    }

    /// Run until stopped or until the error ceiling is hit.
    pub async fn run(mut self) -> WorkerExit {
        self.shared.set_state(STATE_RUNNING);

        info!(
            topic_id = self.topic.id,
            topic = %self.topic.name,
            "Consumer worker running"
        );

        let exit = self.poll_loop().await;

        self.shared.set_state(STATE_STOPPING);

        if let Err(e) = self.subscription.close().await {
            debug!(
                topic_id = self.topic.id,
                error = %e,
                "Error closing subscription"
            );
        }

        self.shared.set_state(STATE_STOPPED);

        info!(
            topic_id = self.topic.id,
            topic = %self.topic.name,
            exit = ?exit,
            records_persisted = self.shared.records_persisted(),
            persist_failures = self.shared.persist_failures(),
            "Consumer worker stopped"
        );

        exit
    }

    async fn poll_loop(&mut self) -> WorkerExit {
        loop {
            if *self.stop_rx.borrow() {
                return WorkerExit::Stopped;
            }

            let polled = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => None,
                result = self.subscription.poll(self.config.poll_timeout) => Some(result),
            };

            let Some(result) = polled else {
                return WorkerExit::Stopped;
            };

            match result {
                Ok(records) if records.is_empty() => {}
                Ok(records) => {
                    self.shared.consecutive_errors.store(0, Ordering::Release);
                    self.handle_batch(records).await;
                }
                Err(e) => {
                    let failures = self.shared.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                    let classified = classify(&e, self.config.max_error_message_len);

                    CONSUMER_ERRORS_TOTAL
                        .with_label_values(&[self.topic.name.as_str(), classified.category.as_str()])
                        .inc();

                    if classified.category.is_auth() {
                        error!(
                            topic_id = self.topic.id,
                            category = %classified.category,
                            consecutive_errors = failures,
                            error = %classified.message,
                            "Broker authentication failure"
                        );
                    } else {
                        warn!(
                            topic_id = self.topic.id,
                            category = %classified.category,
                            consecutive_errors = failures,
                            error = %classified.message,
                            "Consumer poll failed"
                        );
                    }

                    if failures >= self.config.max_consecutive_errors {
                        error!(
                            topic_id = self.topic.id,
                            topic = %self.topic.name,
                            consecutive_errors = failures,
                            "Consumer worker giving up after consecutive errors"
                        );
                        return WorkerExit::ErrorCeiling;
                    }

                    tokio::select! {
                        biased;
                        _ = self.stop_rx.changed() => return WorkerExit::Stopped,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
    }

    async fn handle_batch(&mut self, records: Vec<BrokerRecord>) {
        let count = records.len() as u64;
        let bytes: u64 = records.iter().map(|r| r.size_bytes()).sum();

        self.throughput.record_batch(self.topic.id, count, bytes).await;
        CONSUMER_RECORDS_TOTAL
            .with_label_values(&[self.topic.name.as_str()])
            .inc_by(count);

        let mut failed: u64 = 0;
        let mut first_error: Option<String> = None;

        for record in &records {
            match self.sink.save(&self.topic, record).await {
                Ok(_) => {
                    self.shared.records_persisted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if failed > 0 {
            self.shared.persist_failures.fetch_add(failed, Ordering::Relaxed);
            RECORD_PERSIST_FAILURES_TOTAL
                .with_label_values(&[self.topic.name.as_str()])
                .inc_by(failed);

            warn!(
                topic_id = self.topic.id,
                batch_size = count,
                failed,
                error = %first_error.unwrap_or_default(),
                "Failed to persist records"
            );
        } else {
            debug!(topic_id = self.topic.id, batch_size = count, bytes, "Batch persisted");
        }
    }
}
