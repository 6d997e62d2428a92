//! Consumer Orchestrator
//!
//! Keeps exactly one live consumer worker per monitored topic.
//!
//! ## How It Works
//!
//! 1. Every reconcile interval (default 10s), read the monitored set from the
//!    [`TopicDirectory`] and diff it against the worker registry
//! 2. Start workers for topics without a live one, stop workers whose topic
//!    left the set
//! 3. Every metrics interval (default 5s), publish per-topic throughput to the
//!    event sink and the Prometheus gauges
//!
//! Workers that hit the consecutive-error ceiling remove themselves from the
//! registry. If their topic is still monitored, the next reconcile starts a
//! fresh worker with a zeroed error counter.
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = Arc::new(ConsumerOrchestrator::new(
//!     OrchestratorConfig::from_env(),
//!     directory,
//!     broker,
//!     sink,
//!     events,
//! ));
//!
//! orchestrator.spawn();
//! // ...
//! orchestrator.shutdown().await;
//! ```

use brokerwatch_metadata::MonitoredTopic;
use brokerwatch_observability::metrics::TOPIC_THROUGHPUT;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::classifier::classify;
use crate::config::OrchestratorConfig;
use crate::directory::TopicDirectory;
use crate::error::{AgentError, Result};
use crate::events::{EventSink, MonitorEvent};
use crate::registry::{Reservation, WorkerEntry, WorkerRegistry, WorkerStatus};
use crate::sink::MessageSink;
use crate::throughput::{ThroughputConfig, ThroughputTracker};
use crate::worker::{ConsumerWorker, WorkerConfig, WorkerExit, WorkerShared};

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Size of the monitored set
    pub monitored: usize,
    pub started: usize,
    pub already_running: usize,
    pub stopped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOutcome {
    Started,
    AlreadyRunning,
    Failed,
}

pub struct ConsumerOrchestrator {
    config: OrchestratorConfig,
    directory: Arc<dyn TopicDirectory>,
    broker: Arc<dyn BrokerClient>,
    sink: Arc<dyn MessageSink>,
    events: Arc<dyn EventSink>,
    throughput: Arc<ThroughputTracker>,
    registry: Arc<WorkerRegistry>,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        directory: Arc<dyn TopicDirectory>,
        broker: Arc<dyn BrokerClient>,
        sink: Arc<dyn MessageSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let throughput = Arc::new(ThroughputTracker::new(ThroughputConfig {
            window: config.throughput_window(),
        }));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config,
            directory,
            broker,
            sink,
            events,
            throughput,
            registry: Arc::new(WorkerRegistry::new()),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn throughput(&self) -> &Arc<ThroughputTracker> {
        &self.throughput
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Start the reconcile and metrics loops. Calling it again is a no-op.
    pub async fn spawn(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() || self.is_shut_down() {
            return;
        }

        loops.push(self.spawn_reconcile_loop());
        loops.push(self.spawn_metrics_loop());

        info!(
            reconcile_interval_ms = self.config.reconcile_interval_ms,
            metrics_interval_ms = self.config.metrics_interval_ms,
            "Consumer orchestrator started"
        );
    }

    fn spawn_reconcile_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(orchestrator.config.reconcile_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.reconcile().await {
                            warn!(error = %e, "Reconcile failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Reconcile loop received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_metrics_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(orchestrator.config.metrics_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.broadcast_metrics().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Metrics loop received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    /// Bring the registry in line with the monitored set.
    ///
    /// # Errors
    ///
    /// - `ShutDown`: the orchestrator no longer starts workers
    /// - any error from the topic directory
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        if self.is_shut_down() {
            return Err(AgentError::ShutDown);
        }

        let topics = self.directory.monitored_topics().await?;
        let desired: HashSet<i64> = topics.iter().map(|t| t.id).collect();

        let mut summary = ReconcileSummary {
            monitored: topics.len(),
            ..ReconcileSummary::default()
        };

        for topic_id in self.registry.topic_ids().await {
            if !desired.contains(&topic_id) && self.stop_worker(topic_id).await {
                summary.stopped += 1;
            }
        }

        for topic in &topics {
            match self.start_inner(topic).await {
                StartOutcome::Started => summary.started += 1,
                StartOutcome::AlreadyRunning => summary.already_running += 1,
                StartOutcome::Failed => summary.failed += 1,
            }
        }

        if summary.started > 0 || summary.failed > 0 {
            info!(
                started = summary.started,
                attempted = summary.started + summary.failed,
                failed = summary.failed,
                "Started {} of {} consumers, {} failed",
                summary.started,
                summary.started + summary.failed,
                summary.failed
            );
        }
        if summary.stopped > 0 {
            info!(stopped = summary.stopped, "Stopped consumers for unmonitored topics");
        }

        Ok(summary)
    }

    /// Ensure a live worker exists for `topic`.
    ///
    /// Returns `true` when a worker is running afterwards, when one already
    /// was, or when another start for the topic is in flight. Failures are
    /// logged, not returned.
    pub async fn start_worker(&self, topic: &MonitoredTopic) -> bool {
        self.start_inner(topic).await != StartOutcome::Failed
    }

    async fn start_inner(&self, topic: &MonitoredTopic) -> StartOutcome {
        if self.is_shut_down() {
            warn!(topic_id = topic.id, "Orchestrator is shut down, not starting consumer");
            return StartOutcome::Failed;
        }

        let Some((_connection_id, bootstrap_servers)) = topic.connection() else {
            warn!(
                topic_id = topic.id,
                topic = %topic.name,
                "Topic has no connection configured, not starting consumer"
            );
            return StartOutcome::Failed;
        };

        match self.registry.reserve(topic.id).await {
            Reservation::Reserved => {}
            Reservation::Running => return StartOutcome::AlreadyRunning,
            Reservation::InFlight => {
                debug!(topic_id = topic.id, "Consumer start already in flight");
                return StartOutcome::AlreadyRunning;
            }
        }

        if self.is_shut_down() {
            self.registry.cancel(topic.id).await;
            return StartOutcome::Failed;
        }

        // The registry lock is not held across broker calls.
        match self
            .broker
            .describe_topic(bootstrap_servers, &topic.name)
            .await
        {
            Ok(description) => debug!(
                topic_id = topic.id,
                partitions = description.partitions,
                "Described topic"
            ),
            Err(e) => warn!(
                topic_id = topic.id,
                error = %classify(&e, self.config.max_error_message_len).message,
                "Failed to describe topic, subscribing anyway"
            ),
        }

        let group_id = self.config.group_id(topic.id);
        let subscription = match self
            .broker
            .subscribe(bootstrap_servers, &topic.name, &group_id)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let classified = classify(&e, self.config.max_error_message_len);
                error!(
                    topic_id = topic.id,
                    topic = %topic.name,
                    category = %classified.category,
                    error = %classified.message,
                    "Failed to subscribe"
                );
                self.registry.cancel(topic.id).await;
                return StartOutcome::Failed;
            }
        };

        let mut workers = self.registry.lock().await;
        if !workers.release(topic.id) || self.is_shut_down() {
            drop(workers);
            info!(
                topic_id = topic.id,
                topic = %topic.name,
                "Consumer stopped while subscribing, discarding subscription"
            );
            let mut subscription = subscription;
            if let Err(e) = subscription.close().await {
                warn!(topic_id = topic.id, error = %e, "Failed to close discarded subscription");
            }
            return StartOutcome::Failed;
        }

        self.throughput.register(topic.id, &topic.name).await;

        let generation = self.registry.next_generation();
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(WorkerShared::new());

        let worker = ConsumerWorker::new(
            topic.clone(),
            subscription,
            Arc::clone(&self.sink),
            Arc::clone(&self.throughput),
            WorkerConfig::from(&self.config),
            Arc::clone(&shared),
            stop_rx,
        );

        let topic_id = topic.id;
        let registry = Arc::clone(&self.registry);
        let throughput = Arc::clone(&self.throughput);
        let handle = tokio::spawn(async move {
            if worker.run().await == WorkerExit::ErrorCeiling
                && registry.remove_if_generation(topic_id, generation).await
            {
                throughput.unregister(topic_id).await;
            }
        });

        workers.insert(WorkerEntry::new(
            topic.id,
            topic.name.clone(),
            generation,
            stop_tx,
            handle,
            shared,
        ));
        drop(workers);

        info!(
            topic_id = topic.id,
            topic = %topic.name,
            group_id = %group_id,
            generation,
            "Consumer worker started"
        );

        StartOutcome::Started
    }

    /// Stop the worker for `topic_id`, or revoke a start still subscribing.
    /// Returns `false` if there was neither.
    pub async fn stop_worker(&self, topic_id: i64) -> bool {
        let revoked = self.registry.cancel(topic_id).await;

        let Some(entry) = self.registry.remove(topic_id).await else {
            if revoked {
                info!(topic_id, "Revoked in-flight consumer start");
            } else {
                debug!(topic_id, "No consumer worker to stop");
            }
            return revoked;
        };

        entry.signal_stop();
        self.throughput.unregister(topic_id).await;

        info!(
            topic_id,
            topic = %entry.topic_name,
            generation = entry.generation,
            "Consumer worker stopped"
        );
        true
    }

    /// Stop everything. Idempotent; does not wait for workers to drain.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // Err only when no loop is subscribed.
        let _ = self.shutdown_tx.send(true);

        let entries = self.registry.drain().await;
        for entry in &entries {
            entry.signal_stop();
            self.throughput.unregister(entry.topic_id).await;
        }

        self.loops.lock().await.clear();

        info!(workers = entries.len(), "Consumer orchestrator shut down");
    }

    /// Number of workers whose task is alive.
    pub async fn active_count(&self) -> usize {
        self.registry.alive_count().await
    }

    /// Per-worker status, ordered by topic id.
    pub async fn status(&self) -> Vec<WorkerStatus> {
        self.registry.statuses().await
    }

    /// Publish a throughput snapshot per tracked topic. Returns how many.
    pub async fn broadcast_metrics(&self) -> usize {
        let snapshots = self.throughput.snapshot_all().await;

        for snapshot in &snapshots {
            TOPIC_THROUGHPUT
                .with_label_values(&[snapshot.topic_name.as_str(), "records_per_sec"])
                .set(snapshot.records_per_sec);
            TOPIC_THROUGHPUT
                .with_label_values(&[snapshot.topic_name.as_str(), "bytes_per_sec"])
                .set(snapshot.bytes_per_sec);

            self.events.publish(MonitorEvent::Throughput(snapshot.clone()));
        }

        snapshots.len()
    }
}
