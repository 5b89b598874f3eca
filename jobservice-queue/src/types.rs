//! Core types for the job execution system.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier of one job submission.
pub type JobId = Uuid;

/// String-keyed job parameters.
pub type Parameters = Map<String, Value>;

/// Failure counter written to a record to make the queue treat it as
/// exhausted immediately.
pub const DEAD_LETTER_FAILS: u64 = 10_000_000_000;

/// Request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub max_fails: Option<u32>,
}

impl JobRequest {
    #[inline]
    pub fn new(job_type: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            job_type: job_type.into(),
            parameters,
            max_fails: None,
        }
    }

    /// Override the job type's retry budget for this submission only.
    #[inline]
    #[must_use]
    pub fn with_max_fails(mut self, max_fails: u32) -> Self {
        self.max_fails = Some(max_fails);
        self
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub job_id: JobId,
}

/// The queued description of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub parameters: Parameters,
    /// Number of failed attempts recorded by the queue so far.
    pub fails: u64,
    pub max_fails: Option<u32>,
    pub enqueued_at: DateTime<Utc>,
}

impl JobRecord {
    #[inline]
    pub fn new(job_type: impl Into<String>, parameters: Parameters) -> Self {
        Self::with_id(Uuid::new_v4(), job_type, parameters)
    }

    #[inline]
    pub fn with_id(id: JobId, job_type: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            parameters,
            fails: 0,
            max_fails: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Build the record for an incoming request.
    pub fn from_request(request: JobRequest) -> Self {
        let mut record = Self::new(request.job_type, request.parameters);
        record.max_fails = request.max_fails;
        record
    }

    /// Whether the adapter forced this record onto the dead-letter path.
    #[inline]
    pub const fn is_dead_lettered(&self) -> bool {
        self.fails >= DEAD_LETTER_FAILS
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
    Stopped,
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further execution follows this status.
    ///
    /// `Error` and `Cancelled` are not terminal: the queue may redeliver the
    /// record while its retry budget lasts.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Operator-issued control command delivered to a running job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OpCommand {
    Stop,
    Cancel,
}

impl fmt::Display for OpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Cancel => "cancel",
        })
    }
}

impl FromStr for OpCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown control command: {other}")),
        }
    }
}

/// The status tracker's view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: JobId,
    pub status: JobStatus,
    pub check_in: Option<String>,
    pub check_in_at: Option<DateTime<Utc>>,
    pub command: Option<OpCommand>,
    pub die_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobStats {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            check_in: None,
            check_in_at: None,
            command: None,
            die_at: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Error.is_terminal());
        assert!(!JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn op_command_parses_case_insensitively() {
        assert_eq!("STOP".parse::<OpCommand>().unwrap(), OpCommand::Stop);
        assert_eq!(" cancel ".parse::<OpCommand>().unwrap(), OpCommand::Cancel);
        assert!("pause".parse::<OpCommand>().is_err());
    }

    #[test]
    fn record_from_request_keeps_override() {
        let mut params = Parameters::new();
        params.insert("repository".into(), json!("library/nginx"));
        let record = JobRecord::from_request(JobRequest::new("image.scan", params).with_max_fails(7));
        assert_eq!(record.job_type, "image.scan");
        assert_eq!(record.max_fails, Some(7));
        assert_eq!(record.fails, 0);
        assert!(!record.is_dead_lettered());
    }

    #[test]
    fn status_serializes_lowercase() {
        let v = serde_json::to_value(JobStatus::Cancelled).unwrap();
        assert_eq!(v, json!("cancelled"));
    }
}
