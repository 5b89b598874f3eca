//! Error types for the job execution core.

use thiserror::Error;
use uuid::Uuid;

/// Errors that may occur while interacting with the queue, the status tracker
/// or the registry.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job queue backend error: {0}")]
    Backend(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("no job registered for type '{0}'")]
    NotRegistered(String),

    #[error("job type '{0}' is already registered")]
    DuplicateJobType(String),

    #[error("invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("no log found for job {0}")]
    LogNotFound(Uuid),

    #[error("periodic policy not found: {0}")]
    PolicyNotFound(Uuid),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed job run, as seen by the adapter.
///
/// Jobs return [`JobError::Stopped`] or [`JobError::Cancelled`] when they
/// observe an operator command; every other variant is treated as a failure
/// that may be retried under the job's budget.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job stopped")]
    Stopped,

    #[error("job cancelled")]
    Cancelled,

    #[error("failed to build execution context: {0}")]
    ContextBuild(String),

    #[error("{0}")]
    Runtime(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    Failed(String),
}

/// Classification the adapter uses to pick a status and retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Stopped,
    Cancelled,
    ContextBuild,
    Runtime,
    Ordinary,
}

impl JobError {
    /// Shorthand for an ordinary job-reported failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Build a runtime error from a recovered panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or(payload.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        Self::Runtime(format!("runtime error: {msg}"))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Stopped => FailureKind::Stopped,
            Self::Cancelled => FailureKind::Cancelled,
            Self::ContextBuild(_) => FailureKind::ContextBuild,
            Self::Runtime(_) => FailureKind::Runtime,
            Self::InvalidParameters(_) | Self::Failed(_) => FailureKind::Ordinary,
        }
    }
}

impl From<JobQueueError> for JobError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::InvalidParameters(msg) => Self::InvalidParameters(msg),
            other => Self::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_runtime_errors() {
        let err = JobError::from_panic(&"boom");
        assert_eq!(err.kind(), FailureKind::Runtime);
        assert_eq!(err.to_string(), "runtime error: boom");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bad index"));
        let err = JobError::from_panic(owned.as_ref());
        assert_eq!(err.to_string(), "runtime error: bad index");

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(
            JobError::from_panic(other.as_ref()).to_string(),
            "runtime error: unknown panic"
        );
    }

    #[test]
    fn operator_errors_are_distinguished() {
        assert_eq!(JobError::Stopped.kind(), FailureKind::Stopped);
        assert_eq!(JobError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(JobError::failed("x").kind(), FailureKind::Ordinary);
        assert_eq!(
            JobError::ContextBuild("no log dir".into()).kind(),
            FailureKind::ContextBuild
        );
    }
}
