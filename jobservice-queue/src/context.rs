//! Per-invocation execution context and its builder.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{JobError, JobQueueError};
use crate::logger::{FileJobLogger, JobLogger, TracingJobLogger};
use crate::tracker::StatusTracker;
use crate::types::{JobId, JobRecord, OpCommand};

/// Control and check-in operations of one job, bound to its id.
#[derive(Clone)]
pub struct JobControl {
    job_id: JobId,
    tracker: Arc<dyn StatusTracker>,
}

impl JobControl {
    pub fn new(job_id: JobId, tracker: Arc<dyn StatusTracker>) -> Self {
        Self { job_id, tracker }
    }

    /// Poll for a pending operator command.
    ///
    /// Tracker failures read as "no command" so a flaky store never aborts a
    /// job.
    pub async fn op_command(&self) -> Option<OpCommand> {
        match self.tracker.ctl_command(self.job_id).await {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to poll control command");
                None
            }
        }
    }

    /// Forward a progress message. Errors are logged and dropped.
    pub async fn check_in(&self, message: &str) {
        if let Err(e) = self.tracker.check_in(self.job_id, message).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "failed to record check-in");
        }
    }
}

/// Environment a job runs in. Owned by a single invocation.
pub struct ExecutionContext {
    job_id: JobId,
    job_type: String,
    logger: Box<dyn JobLogger>,
    control: JobControl,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_id", &self.job_id)
            .field("job_type", &self.job_type)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        job_id: JobId,
        job_type: impl Into<String>,
        logger: Box<dyn JobLogger>,
        control: JobControl,
    ) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            logger,
            control,
        }
    }

    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    #[inline]
    pub fn logger(&self) -> &dyn JobLogger {
        self.logger.as_ref()
    }

    /// Poll for a pending operator command.
    pub async fn op_command(&self) -> Option<OpCommand> {
        self.control.op_command().await
    }

    /// Report progress for observability.
    pub async fn check_in(&self, message: &str) {
        self.control.check_in(message).await;
    }

    /// Turn a pending operator command into the matching error.
    ///
    /// Jobs call this between units of work:
    ///
    /// ```rust,ignore
    /// for blob in blobs {
    ///     ctx.checkpoint().await?;
    ///     delete(blob).await?;
    /// }
    /// ```
    pub async fn checkpoint(&self) -> Result<(), JobError> {
        match self.op_command().await {
            Some(OpCommand::Stop) => {
                self.logger.info("stop command received");
                Err(JobError::Stopped)
            }
            Some(OpCommand::Cancel) => {
                self.logger.info("cancel command received");
                Err(JobError::Cancelled)
            }
            None => Ok(()),
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.logger.close();
    }
}

/// Creates the logger of one invocation.
pub type LoggerFactory =
    Arc<dyn Fn(&JobRecord) -> io::Result<Box<dyn JobLogger>> + Send + Sync>;

/// Builds the [`ExecutionContext`] of each invocation.
///
/// Loggers come from a custom [`LoggerFactory`] if one is set, otherwise
/// from the log directory, otherwise they forward to `tracing`.
#[derive(Clone)]
pub struct ContextBuilder {
    tracker: Arc<dyn StatusTracker>,
    log_dir: Option<PathBuf>,
    logger_factory: Option<LoggerFactory>,
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("tracker", &"<dyn StatusTracker>")
            .field("log_dir", &self.log_dir)
            .field("custom_logger", &self.logger_factory.is_some())
            .finish()
    }
}

impl ContextBuilder {
    /// Build contexts whose loggers forward to `tracing`.
    pub fn new(tracker: Arc<dyn StatusTracker>) -> Self {
        Self {
            tracker,
            log_dir: None,
            logger_factory: None,
        }
    }

    /// Write each job's log to its own file inside `dir`.
    ///
    /// The directory must exist; [`WorkerPool::start`](crate::WorkerPool::start)
    /// creates it for the pool.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_logger_factory(mut self, factory: LoggerFactory) -> Self {
        self.logger_factory = Some(factory);
        self
    }

    pub fn build(&self, record: &JobRecord) -> Result<ExecutionContext, JobQueueError> {
        let logger: Box<dyn JobLogger> = match (&self.logger_factory, &self.log_dir) {
            (Some(factory), _) => factory(record)?,
            (None, Some(dir)) => Box::new(FileJobLogger::open(dir, record.id, &record.job_type)?),
            (None, None) => Box::new(TracingJobLogger::new(record.id, &record.job_type)),
        };
        let control = JobControl::new(record.id, Arc::clone(&self.tracker));

        Ok(ExecutionContext::new(
            record.id,
            &record.job_type,
            logger,
            control,
        ))
    }
}
