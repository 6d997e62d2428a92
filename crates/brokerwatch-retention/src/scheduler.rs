//! Maintenance Scheduler
//!
//! Runs the four maintenance jobs on fixed intervals:
//!
//! | Job | Default interval |
//! |-----|------------------|
//! | ARCHIVE | hourly |
//! | PURGE_ARCHIVE | daily, only while the global policy enables auto-purge |
//! | STATS_AGGREGATE | hourly |
//! | STATS_CLEANUP | daily |
//!
//! Each loop runs its job once per tick. A failed job is already recorded in
//! its job log, so the loop only logs and waits for the next tick. The first
//! tick fires immediately.

use brokerwatch_metadata::{JobLog, MetadataStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::archival::ArchivalEngine;
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::job::JobRunner;
use crate::purge::PurgeEngine;
use crate::stats::StatsAggregator;

pub struct MaintenanceScheduler {
    config: MaintenanceConfig,
    jobs: JobRunner,
    archival: Arc<ArchivalEngine>,
    purge: Arc<PurgeEngine>,
    stats: Arc<StatsAggregator>,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<dyn MetadataStore>, config: MaintenanceConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            jobs: JobRunner::new(store.clone()),
            archival: Arc::new(ArchivalEngine::new(store.clone(), config.clone())),
            purge: Arc::new(PurgeEngine::new(store.clone())),
            stats: Arc::new(StatsAggregator::new(store)),
            config,
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn archival(&self) -> &Arc<ArchivalEngine> {
        &self.archival
    }

    pub fn purge(&self) -> &Arc<PurgeEngine> {
        &self.purge
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Fail jobs interrupted by a previous process, then start the loops.
    /// Calling it again while running, or after shutdown, is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() || *self.shutdown_tx.borrow() {
            return Ok(());
        }

        self.jobs.recover_interrupted().await?;

        let archival = self.archival.clone();
        loops.push(self.spawn_loop("archive", self.config.archive_interval(), move || {
            let archival = archival.clone();
            async move { report("archive", archival.archive_old_messages().await) }
        }));

        let purge = self.purge.clone();
        loops.push(self.spawn_loop("purge", self.config.purge_interval(), move || {
            let purge = purge.clone();
            async move {
                match purge.auto_purge_enabled().await {
                    Ok(true) => report("purge", purge.purge_expired_archives().await),
                    Ok(false) => debug!("Auto-purge disabled by global policy, skipping"),
                    Err(e) => error!(error = %e, "Failed to read global policy"),
                }
            }
        }));

        let stats = self.stats.clone();
        loops.push(self.spawn_loop("stats", self.config.stats_interval(), move || {
            let stats = stats.clone();
            async move { report("stats", stats.aggregate_stats().await) }
        }));

        let stats = self.stats.clone();
        loops.push(self.spawn_loop(
            "stats-cleanup",
            self.config.stats_cleanup_interval(),
            move || {
                let stats = stats.clone();
                async move { report("stats-cleanup", stats.cleanup_old_stats().await) }
            },
        ));

        info!(
            archive_interval_ms = self.config.archive_interval_ms,
            purge_interval_ms = self.config.purge_interval_ms,
            stats_interval_ms = self.config.stats_interval_ms,
            stats_cleanup_interval_ms = self.config.stats_cleanup_interval_ms,
            "Maintenance scheduler started"
        );
        Ok(())
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = shutdown_rx.changed() => {
                        debug!(job = name, "Maintenance loop received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the loops and wait for any job in progress to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let loops: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance loop ended abnormally");
            }
        }

        info!("Maintenance scheduler stopped");
    }
}

fn report(job: &'static str, result: Result<Option<JobLog>>) {
    match result {
        Ok(Some(log)) => debug!(job, job_id = log.id, status = %log.status, "Scheduled job finished"),
        Ok(None) => debug!(job, "Previous run still in progress, skipping"),
        Err(e) => error!(job, error = %e, "Scheduled job could not be recorded"),
    }
}
