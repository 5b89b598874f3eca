//! The contract every unit of work implements.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::JobError;
use crate::types::Parameters;

/// Retry budget used when a job type does not declare one.
pub const DEFAULT_MAX_FAILS: u32 = 4;

/// Trait for implementing job types.
///
/// Each job type registers one implementation with the
/// [`JobRegistry`](crate::JobRegistry). Delivery is at-least-once: `run` may
/// be invoked again after a failed attempt, so side effects on external
/// systems must be idempotent or compensable.
///
/// Cancellation is cooperative. There is no preemption and no engine
/// timeout; long-running jobs must call
/// [`ExecutionContext::checkpoint`] at safe points to honour stop and cancel
/// commands.
#[async_trait]
pub trait Job: Send + Sync {
    /// Returns the job type this implementation handles.
    fn job_type(&self) -> &str;

    /// Maximum number of failures before the job is dead-lettered.
    ///
    /// `0` selects the engine default.
    fn max_fails(&self) -> u32 {
        0
    }

    /// Whether failed runs of this job type may be retried automatically.
    fn should_retry(&self) -> bool;

    /// Check the parameters before the job is accepted or run.
    fn validate(&self, _params: &Parameters) -> Result<(), JobError> {
        Ok(())
    }

    /// Execute the job.
    async fn run(&self, ctx: &ExecutionContext, params: &Parameters) -> Result<(), JobError>;
}

/// A job that completes immediately.
///
/// Handy as a placeholder for job types whose implementation lives elsewhere,
/// and in tests.
#[derive(Debug, Default, Clone)]
pub struct NoOpJob {
    job_type: String,
}

impl NoOpJob {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl Job for NoOpJob {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn should_retry(&self) -> bool {
        true
    }

    async fn run(&self, _ctx: &ExecutionContext, _params: &Parameters) -> Result<(), JobError> {
        Ok(())
    }
}
