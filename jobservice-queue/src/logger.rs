//! Per-job loggers handed to running jobs.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;

use crate::types::JobId;

/// Logger a job writes its progress to.
///
/// A logger is a scoped resource: the [`ExecutionContext`](crate::ExecutionContext)
/// that owns it calls [`JobLogger::close`] exactly once when the invocation
/// ends, whatever the outcome.
pub trait JobLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    /// Release any resources held by the logger.
    fn close(&self) {}

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards job log lines to `tracing`, tagged with the job id and type.
#[derive(Debug, Clone)]
pub struct TracingJobLogger {
    job_id: JobId,
    job_type: String,
}

impl TracingJobLogger {
    pub fn new(job_id: JobId, job_type: impl Into<String>) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
        }
    }
}

impl JobLogger for TracingJobLogger {
    fn log(&self, level: Level, message: &str) {
        let (id, ty) = (&self.job_id, self.job_type.as_str());
        match level {
            Level::ERROR => tracing::error!(job_id = %id, job_type = ty, "{message}"),
            Level::WARN => tracing::warn!(job_id = %id, job_type = ty, "{message}"),
            Level::INFO => tracing::info!(job_id = %id, job_type = ty, "{message}"),
            Level::DEBUG => tracing::debug!(job_id = %id, job_type = ty, "{message}"),
            _ => tracing::trace!(job_id = %id, job_type = ty, "{message}"),
        }
    }
}

/// Writes job log lines to `<dir>/<job_id>.log` and mirrors them to `tracing`.
#[derive(Debug)]
pub struct FileJobLogger {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    mirror: TracingJobLogger,
}

impl FileJobLogger {
    /// Open (or append to) the log file of a job inside `dir`, which must
    /// already exist.
    pub fn open(
        dir: impl AsRef<Path>,
        job_id: JobId,
        job_type: impl Into<String>,
    ) -> std::io::Result<Self> {
        let path = dir.as_ref().join(format!("{job_id}.log"));
        // Blocking, but a single open on a local directory.
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            mirror: TracingJobLogger::new(job_id, job_type),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobLogger for FileJobLogger {
    fn log(&self, level: Level, message: &str) {
        self.mirror.log(level, message);

        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        if let Some(writer) = guard.as_mut() {
            let line = format!(
                "{} [{}] {}\n",
                chrono::Utc::now().to_rfc3339(),
                level,
                message
            );
            if let Err(e) = writer.write_all(line.as_bytes()) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write job log");
            }
        }
    }

    fn close(&self) {
        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        if let Some(mut writer) = guard.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to flush job log");
            }
        }
    }
}
