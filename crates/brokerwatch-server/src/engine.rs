//! Engine
//!
//! Wires the consumer orchestrator and the maintenance scheduler over one
//! metadata store and one event channel.
//!
//! ```text
//!                    ┌──────────────────────┐
//!   BrokerClient ──► │ ConsumerOrchestrator │ ──► StoreMessageSink ──┐
//!                    └──────────┬───────────┘                        │
//!                               │ throughput                         ▼
//!                               ▼                             ┌────────────┐
//!                      BroadcastEventSink ◄───── events ───── │ Metadata   │
//!                                                             │ store      │
//!                    ┌──────────────────────┐                 │ (SQLite)   │
//!                    │ MaintenanceScheduler │ ──────────────► └────────────┘
//!                    └──────────────────────┘
//! ```
//!
//! The broker client is optional. Without one only maintenance runs.

use brokerwatch_agent::{
    BroadcastEventSink, BrokerClient, ConsumerOrchestrator, MonitorEvent, StoreMessageSink,
    StoreTopicDirectory, WorkerStatus,
};
use brokerwatch_metadata::{JobLog, MetadataStore, SqliteMetadataStore};
use brokerwatch_retention::{
    ArchivalEngine, MaintenanceScheduler, PolicyResolver, PurgeEngine, StatsAggregator,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Point-in-time view for health checks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub consumers_enabled: bool,
    pub monitored_topics: usize,
    pub active_workers: usize,
    pub workers: Vec<WorkerStatus>,
    /// Most recent job logs, newest first
    pub recent_jobs: Vec<JobLog>,
    pub started_at: i64,
    pub uptime_ms: i64,
}

impl HealthSnapshot {
    /// Every monitored topic has a live worker, when consumers are enabled.
    pub fn is_healthy(&self) -> bool {
        !self.consumers_enabled || self.active_workers >= self.monitored_topics
    }
}

pub struct Engine {
    store: Arc<dyn MetadataStore>,
    events: Arc<BroadcastEventSink>,
    orchestrator: Option<Arc<ConsumerOrchestrator>>,
    scheduler: MaintenanceScheduler,
    started_at: i64,
}

impl Engine {
    /// Build an engine over an open store.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        broker: Option<Arc<dyn BrokerClient>>,
        config: EngineConfig,
    ) -> Self {
        brokerwatch_observability::init();

        let events = Arc::new(BroadcastEventSink::new(config.event_capacity));

        let orchestrator = broker.map(|broker| {
            Arc::new(ConsumerOrchestrator::new(
                config.orchestrator.clone(),
                Arc::new(StoreTopicDirectory::new(store.clone())),
                broker,
                Arc::new(StoreMessageSink::new(store.clone(), events.clone())),
                events.clone(),
            ))
        });

        let scheduler = MaintenanceScheduler::new(store.clone(), config.maintenance.clone());

        Self {
            store,
            events,
            orchestrator,
            scheduler,
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Open the SQLite database at `path` (running migrations) and build an engine.
    pub async fn open<P: AsRef<Path>>(
        path: P,
        broker: Option<Arc<dyn BrokerClient>>,
        config: EngineConfig,
    ) -> Result<Self> {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(path).await?);
        Ok(Self::new(store, broker, config))
    }

    /// Start maintenance and, with a broker client, consumer orchestration.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;

        match &self.orchestrator {
            Some(orchestrator) => orchestrator.spawn().await,
            None => warn!("No broker client configured, consumer orchestration disabled"),
        }

        info!(
            consumers_enabled = self.orchestrator.is_some(),
            "brokerwatch engine started"
        );
        Ok(())
    }

    /// Stop consumers first, then wait for maintenance loops to finish.
    pub async fn shutdown(&self) {
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.shutdown().await;
        }
        self.scheduler.shutdown().await;
        info!("brokerwatch engine stopped");
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> Option<&Arc<ConsumerOrchestrator>> {
        self.orchestrator.as_ref()
    }

    pub fn archival(&self) -> &Arc<ArchivalEngine> {
        self.scheduler.archival()
    }

    pub fn purge(&self) -> &Arc<PurgeEngine> {
        self.scheduler.purge()
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        self.scheduler.stats()
    }

    pub fn resolver(&self) -> PolicyResolver {
        PolicyResolver::new(self.store.clone())
    }

    /// Receive monitor events (new messages, topic updates, throughput).
    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub async fn health(&self) -> Result<HealthSnapshot> {
        let monitored_topics = self.store.list_monitored_topics().await?.len();
        let recent_jobs = self.store.list_jobs(None, 10).await?;

        let (active_workers, workers) = match &self.orchestrator {
            Some(orchestrator) => (orchestrator.active_count().await, orchestrator.status().await),
            None => (0, Vec::new()),
        };

        let now = chrono::Utc::now().timestamp_millis();
        Ok(HealthSnapshot {
            consumers_enabled: self.orchestrator.is_some(),
            monitored_topics,
            active_workers,
            workers,
            recent_jobs,
            started_at: self.started_at,
            uptime_ms: (now - self.started_at).max(0),
        })
    }

    /// Prometheus text exposition of every brokerwatch metric.
    pub fn metrics_text(&self) -> Result<String> {
        brokerwatch_observability::exporter::gather_text()
            .map_err(|e| EngineError::Metrics(e.to_string()))
    }
}
