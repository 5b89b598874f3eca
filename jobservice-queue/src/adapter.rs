//! Bridges a [`Job`] to the backing queue: status updates, panic containment
//! and the retry/dead-letter decision.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::context::{ContextBuilder, ExecutionContext};
use crate::dead_letter::DeadLetterScheduler;
use crate::error::{FailureKind, JobError};
use crate::job::{Job, DEFAULT_MAX_FAILS};
use crate::tracker::StatusTracker;
use crate::types::{JobId, JobRecord, JobStatus, DEAD_LETTER_FAILS};

/// Decides when a failed job must stop being retried before the queue's own
/// budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    default_max_fails: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILS)
    }
}

impl RetryPolicy {
    pub const fn new(default_max_fails: u32) -> Self {
        Self { default_max_fails }
    }

    /// Max-fails threshold of a job type, before any per-record override.
    pub fn max_fails_for(&self, job: &dyn Job) -> u32 {
        match job.max_fails() {
            0 => self.default_max_fails,
            n => n,
        }
    }

    /// Max-fails threshold that applies to one record.
    pub fn effective_max_fails(&self, job: &dyn Job, record: &JobRecord) -> u32 {
        record
            .max_fails
            .filter(|n| *n > 0)
            .unwrap_or_else(|| self.max_fails_for(job))
    }

    /// Whether the queue must be kept from retrying this record.
    ///
    /// Only early stops matter here: once `fails` reaches the threshold the
    /// queue dead-letters the record by itself.
    pub fn should_disable_retry(&self, job: &dyn Job, record: &JobRecord, cancelled: bool) -> bool {
        let max_fails = u64::from(self.effective_max_fails(job, record));
        // the attempt being reported has not been counted by the queue yet
        let fails = record.fails.saturating_add(1);

        if fails >= max_fails {
            return false;
        }
        cancelled || !job.should_retry()
    }
}

/// How one invocation ended.
#[derive(Debug)]
enum Outcome {
    Succeeded,
    Stopped,
    Cancelled(JobError),
    Failed(JobError),
    ContextBuildFailed(JobError),
}

/// Wraps one job implementation into the unit the worker pool invokes.
#[derive(Clone)]
pub struct JobAdapter {
    job: Arc<dyn Job>,
    builder: ContextBuilder,
    tracker: Arc<dyn StatusTracker>,
    dead_letters: DeadLetterScheduler,
    policy: RetryPolicy,
}

impl fmt::Debug for JobAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobAdapter")
            .field("job_type", &self.job.job_type())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl JobAdapter {
    pub fn new(
        job: Arc<dyn Job>,
        builder: ContextBuilder,
        tracker: Arc<dyn StatusTracker>,
        dead_letters: DeadLetterScheduler,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            job,
            builder,
            tracker,
            dead_letters,
            policy,
        }
    }

    #[inline]
    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// Run one delivery of `record`.
    ///
    /// `Ok(())` tells the queue not to retry (success or stop). `Err` tells it
    /// to count a failure; when retries had to be disabled early the record's
    /// failure counter is raised to [`DEAD_LETTER_FAILS`] first, so the queue
    /// dead-letters it right away.
    pub async fn run(&self, record: &mut JobRecord) -> Result<(), JobError> {
        let job_id = record.id;
        self.set_status(job_id, JobStatus::Running).await;

        let outcome = match self.prepare(record) {
            Ok(ctx) => {
                let outcome = self.invoke(&ctx, record).await;
                // releases the job logger
                drop(ctx);
                outcome
            }
            Err(err) => Outcome::ContextBuildFailed(err),
        };

        match outcome {
            Outcome::Succeeded => {
                tracing::info!(job_id = %job_id, job_type = %record.job_type, "job exit with success");
                self.set_status(job_id, JobStatus::Success).await;
                Ok(())
            }
            Outcome::Stopped => {
                tracing::info!(job_id = %job_id, job_type = %record.job_type, "job stopped");
                self.set_status(job_id, JobStatus::Stopped).await;
                Ok(())
            }
            Outcome::Cancelled(err) => {
                tracing::warn!(job_id = %job_id, job_type = %record.job_type, "job cancelled");
                self.set_status(job_id, JobStatus::Cancelled).await;
                if self.policy.should_disable_retry(self.job.as_ref(), record, true) {
                    self.dead_letter(record);
                }
                Err(err)
            }
            Outcome::Failed(err) => {
                tracing::error!(
                    job_id = %job_id,
                    job_type = %record.job_type,
                    error = %err,
                    "job exit with error"
                );
                self.set_status(job_id, JobStatus::Error).await;
                if self.policy.should_disable_retry(self.job.as_ref(), record, false) {
                    self.dead_letter(record);
                }
                Err(err)
            }
            Outcome::ContextBuildFailed(err) => {
                tracing::error!(
                    job_id = %job_id,
                    job_type = %record.job_type,
                    error = %err,
                    "job exit with error"
                );
                self.set_status(job_id, JobStatus::Error).await;
                self.dead_letter(record);
                Err(err)
            }
        }
    }

    /// Build the context and check the parameters. Neither is worth retrying.
    fn prepare(&self, record: &JobRecord) -> Result<ExecutionContext, JobError> {
        let ctx = self
            .builder
            .build(record)
            .map_err(|e| JobError::ContextBuild(e.to_string()))?;
        std::panic::catch_unwind(AssertUnwindSafe(|| self.job.validate(&record.parameters)))
            .unwrap_or_else(|panic| Err(JobError::from_panic(panic.as_ref())))
            .map_err(|e| JobError::ContextBuild(e.to_string()))?;
        Ok(ctx)
    }

    async fn invoke(&self, ctx: &ExecutionContext, record: &JobRecord) -> Outcome {
        let result = AssertUnwindSafe(self.job.run(ctx, &record.parameters))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::from_panic(panic.as_ref())));

        match result {
            Ok(()) => Outcome::Succeeded,
            Err(err) => match err.kind() {
                FailureKind::Stopped => Outcome::Stopped,
                FailureKind::Cancelled => Outcome::Cancelled(err),
                _ => Outcome::Failed(err),
            },
        }
    }

    fn dead_letter(&self, record: &mut JobRecord) {
        tracing::warn!(
            job_id = %record.id,
            job_type = %record.job_type,
            fails = record.fails,
            "retries disabled, forcing job to dead-letter queue"
        );
        record.fails = DEAD_LETTER_FAILS;
        self.dead_letters.schedule(record.id, Utc::now());
    }

    async fn set_status(&self, job_id: JobId, status: JobStatus) {
        if let Err(e) = self.tracker.set_status(job_id, status).await {
            tracing::warn!(job_id = %job_id, %status, error = %e, "failed to update job status");
        }
    }
}
