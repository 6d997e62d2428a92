//! Job Log Discipline
//!
//! Every maintenance run is bracketed by a job log:
//!
//! 1. [`JobRunner::begin`] inserts a STARTED row unless one of the same type
//!    is already STARTED. That insert is a single conditional statement, so
//!    two triggers racing for the same type cannot both win. The loser gets
//!    `None` and does nothing.
//! 2. The work accumulates counters on the [`JobHandle`].
//! 3. [`JobRunner::finish`] writes COMPLETED with the counters, or FAILED with
//!    the error message. Work errors end here; they are never rethrown.

use brokerwatch_metadata::{JobCounters, JobLog, JobStatus, JobType, MetadataStore};
use brokerwatch_observability::metrics::{JOB_DURATION, MAINTENANCE_JOBS_TOTAL};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::now_ms;

/// A STARTED job owned by the caller until it is finished.
#[derive(Debug)]
pub struct JobHandle {
    log: JobLog,
    counters: JobCounters,
    timer: Instant,
}

impl JobHandle {
    pub fn id(&self) -> i64 {
        self.log.id
    }

    pub fn job_type(&self) -> JobType {
        self.log.job_type
    }

    pub fn counters(&self) -> &JobCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut JobCounters {
        &mut self.counters
    }
}

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn MetadataStore>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Open a job of `job_type`, or `None` if one is already running.
    pub async fn begin(&self, job_type: JobType) -> Result<Option<JobHandle>> {
        match self.store.try_start_job(job_type, now_ms()).await? {
            Some(log) => {
                debug!(job_id = log.id, job_type = %job_type, "Job started");
                Ok(Some(JobHandle {
                    log,
                    counters: JobCounters::default(),
                    timer: Instant::now(),
                }))
            }
            None => {
                debug!(job_type = %job_type, "Job already running, skipping");
                Ok(None)
            }
        }
    }

    /// Finalize a job from the outcome of its work.
    ///
    /// Only a failure to write the job log itself is returned as an error.
    pub async fn finish(&self, job: JobHandle, outcome: Result<()>) -> Result<JobLog> {
        let job_type = job.job_type();
        let (status, error_message) = match outcome {
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => (JobStatus::Failed, Some(e.to_string())),
        };

        let log = self
            .store
            .finish_job(job.id(), status, job.counters, error_message, now_ms())
            .await?;

        MAINTENANCE_JOBS_TOTAL
            .with_label_values(&[job_type.as_str(), status.as_str()])
            .inc();
        JOB_DURATION.observe(job.timer.elapsed().as_secs_f64());

        match status {
            JobStatus::Failed => error!(
                job_id = log.id,
                job_type = %job_type,
                error = log.error_message.as_deref().unwrap_or_default(),
                messages_processed = log.messages_processed,
                "Job failed"
            ),
            _ => info!(
                job_id = log.id,
                job_type = %job_type,
                messages_processed = log.messages_processed,
                messages_archived = log.messages_archived,
                messages_deleted = log.messages_deleted,
                bytes_freed = log.bytes_freed,
                duration_ms = log.duration_ms.unwrap_or_default(),
                "Job completed"
            ),
        }

        Ok(log)
    }

    /// Fail every job left STARTED by a previous process.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let failed = self
            .store
            .fail_started_jobs("interrupted before completion", now_ms())
            .await?;
        if failed > 0 {
            warn!(jobs = failed, "Marked interrupted jobs as failed");
        }
        Ok(failed)
    }
}
