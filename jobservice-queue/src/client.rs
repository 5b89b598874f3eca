//! Job submission and control client.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::JobQueueError;
use crate::queue::BackingQueue;
use crate::registry::JobRegistry;
use crate::tracker::StatusTracker;
use crate::types::{EnqueueResult, JobId, JobRecord, JobRequest, JobStats, JobStatus, OpCommand};

/// Interface for enqueuing jobs and steering them while they run.
#[derive(Clone)]
pub struct JobQueueClient {
    registry: Arc<JobRegistry>,
    queue: Arc<dyn BackingQueue>,
    tracker: Arc<dyn StatusTracker>,
    log_dir: Option<PathBuf>,
}

impl fmt::Debug for JobQueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueueClient")
            .field("registry", &self.registry)
            .field("queue", &"<dyn BackingQueue>")
            .field("tracker", &"<dyn StatusTracker>")
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl JobQueueClient {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<dyn BackingQueue>,
        tracker: Arc<dyn StatusTracker>,
    ) -> Self {
        Self {
            registry,
            queue,
            tracker,
            log_dir: None,
        }
    }

    /// Serve job logs from `dir`, the pool's job log directory.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Check that the job type is registered and its parameters validate.
    pub fn check(&self, request: &JobRequest) -> Result<(), JobQueueError> {
        let job = self
            .registry
            .get(&request.job_type)
            .ok_or_else(|| JobQueueError::NotRegistered(request.job_type.clone()))?;
        job.validate(&request.parameters)
            .map_err(|e| JobQueueError::InvalidParameters(e.to_string()))
    }

    /// Enqueue a job for asynchronous processing.
    ///
    /// The job type must be registered and its parameters must validate.
    pub async fn enqueue(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        self.check(&request)?;

        let record = JobRecord::from_request(request);
        let (job_id, job_type) = (record.id, record.job_type.clone());

        self.tracker.set_status(job_id, JobStatus::Pending).await?;
        self.queue.push(record).await?;

        tracing::info!(job_id = %job_id, job_type = %job_type, "job enqueued");
        Ok(EnqueueResult { job_id })
    }

    /// Ask a running job to stop. The job halts at its next checkpoint and is
    /// not retried.
    pub async fn stop(&self, job_id: JobId) -> Result<(), JobQueueError> {
        self.send(job_id, OpCommand::Stop).await
    }

    /// Ask a running job to cancel at its next checkpoint.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), JobQueueError> {
        self.send(job_id, OpCommand::Cancel).await
    }

    /// Get the tracked state of a job.
    pub async fn stats(&self, job_id: JobId) -> Result<JobStats, JobQueueError> {
        self.tracker
            .stats(job_id)
            .await?
            .ok_or(JobQueueError::NotFound(job_id))
    }

    /// Read the log file of a job.
    ///
    /// `job_id` comes from callers as text and is rejected unless it is a
    /// plain job id, so it can never name a file outside the log directory.
    pub async fn job_log(&self, job_id: &str) -> Result<String, JobQueueError> {
        if job_id.contains("..") || job_id.contains(['/', '\\']) {
            return Err(JobQueueError::InvalidJobId(job_id.to_owned()));
        }
        let id: JobId = job_id
            .parse()
            .map_err(|_| JobQueueError::InvalidJobId(job_id.to_owned()))?;
        let dir = self
            .log_dir
            .as_ref()
            .ok_or_else(|| JobQueueError::Backend("job logs are not written to files".into()))?;

        match tokio::fs::read_to_string(dir.join(format!("{id}.log"))).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(JobQueueError::LogNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn send(&self, job_id: JobId, command: OpCommand) -> Result<(), JobQueueError> {
        let stats = self.stats(job_id).await?;
        if stats.status.is_terminal() {
            return Err(JobQueueError::Backend(format!(
                "job {job_id} already finished with status {}",
                stats.status
            )));
        }
        self.tracker.send_command(job_id, command).await?;
        tracing::info!(job_id = %job_id, %command, "control command issued");
        Ok(())
    }
}
