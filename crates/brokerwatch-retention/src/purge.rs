//! Purge Engine
//!
//! Deletes archive rows older than the global policy's archive retention in a
//! single statement. Bytes freed are not tracked for purges.

use brokerwatch_metadata::{JobCounters, JobLog, JobType, MetadataStore};
use brokerwatch_observability::metrics::ARCHIVES_PURGED_TOTAL;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::job::JobRunner;
use crate::resolver::PolicyResolver;
use crate::{now_ms, DAY_MS};

pub struct PurgeEngine {
    store: Arc<dyn MetadataStore>,
    resolver: PolicyResolver,
    jobs: JobRunner,
}

impl PurgeEngine {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            resolver: PolicyResolver::new(store.clone()),
            jobs: JobRunner::new(store.clone()),
            store,
        }
    }

    /// Whether the global policy allows the scheduler to purge.
    pub async fn auto_purge_enabled(&self) -> Result<bool> {
        Ok(self.resolver.global_policy().await?.auto_purge_enabled)
    }

    /// PURGE_ARCHIVE job. Returns `None` when one is already running.
    pub async fn purge_expired_archives(&self) -> Result<Option<JobLog>> {
        let Some(mut job) = self.jobs.begin(JobType::PurgeArchive).await? else {
            return Ok(None);
        };

        let outcome = self.purge(job.counters_mut()).await;
        Ok(Some(self.jobs.finish(job, outcome).await?))
    }

    async fn purge(&self, counters: &mut JobCounters) -> Result<()> {
        let policy = self.resolver.global_policy().await?;
        let cutoff = now_ms() - policy.archive_retention_days.max(0) * DAY_MS;

        let deleted = self.store.delete_archives_before(cutoff).await?;

        counters.messages_processed += deleted as i64;
        counters.messages_deleted += deleted as i64;
        ARCHIVES_PURGED_TOTAL.inc_by(deleted);

        info!(
            deleted,
            archive_retention_days = policy.archive_retention_days,
            cutoff,
            "Purged expired archives"
        );
        Ok(())
    }
}
