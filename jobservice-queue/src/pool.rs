//! Fixed-size pool of workers pulling records from the backing queue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{JobAdapter, RetryPolicy};
use crate::context::ContextBuilder;
use crate::dead_letter::{DeadLetterScheduler, DEFAULT_DEAD_LETTER_GRACE};
use crate::error::JobQueueError;
use crate::job::DEFAULT_MAX_FAILS;
use crate::queue::{BackingQueue, QueueStats};
use crate::registry::JobRegistry;
use crate::tracker::StatusTracker;
use crate::types::{JobRecord, JobStatus};

/// Settings of a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub default_max_fails: u32,
    pub dead_letter_grace: Duration,
    /// Deliver pending dead-letter confirmations on shutdown instead of
    /// dropping them.
    pub drain_dead_letters_on_shutdown: bool,
    pub job_log_dir: Option<PathBuf>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            default_max_fails: DEFAULT_MAX_FAILS,
            dead_letter_grace: DEFAULT_DEAD_LETTER_GRACE,
            drain_dead_letters_on_shutdown: true,
            job_log_dir: None,
        }
    }
}

type Adapters = Arc<HashMap<String, JobAdapter>>;

/// Point-in-time view of a running pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub workers: usize,
    /// Workers currently running a job.
    pub busy: usize,
    #[serde(flatten)]
    pub queue: QueueStats,
}

/// Runs registered jobs from a [`BackingQueue`] on a fixed number of tokio
/// tasks.
///
/// Each worker runs one job at a time to completion. Jobs are never
/// interrupted: [`shutdown`](Self::shutdown) stops workers from taking new
/// records and then waits for the running ones, so a job that neither
/// returns nor polls its control command keeps the pool from shutting down.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    registry: Arc<JobRegistry>,
    queue: Arc<dyn BackingQueue>,
    tracker: Arc<dyn StatusTracker>,
    dead_letters: DeadLetterScheduler,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    busy: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("running_workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        registry: Arc<JobRegistry>,
        queue: Arc<dyn BackingQueue>,
        tracker: Arc<dyn StatusTracker>,
    ) -> Self {
        let dead_letters = DeadLetterScheduler::new(Arc::clone(&tracker), config.dead_letter_grace);
        Self {
            config,
            registry,
            queue,
            tracker,
            dead_letters,
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn dead_letters(&self) -> &DeadLetterScheduler {
        &self.dead_letters
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Worker count, busy workers and queue depth.
    pub async fn status(&self) -> Result<PoolStatus, JobQueueError> {
        Ok(PoolStatus {
            workers: self.workers.len(),
            busy: self.busy.load(Ordering::Relaxed),
            queue: self.queue.stats().await?,
        })
    }

    /// Create the job log directory, register retry thresholds with the
    /// queue and spawn the workers.
    pub async fn start(&mut self) -> Result<(), JobQueueError> {
        if self.is_running() {
            return Err(JobQueueError::Backend("worker pool already started".into()));
        }
        if self.config.workers == 0 {
            return Err(JobQueueError::Backend("worker pool needs at least one worker".into()));
        }

        let policy = RetryPolicy::new(self.config.default_max_fails);
        let mut builder = ContextBuilder::new(Arc::clone(&self.tracker));
        if let Some(dir) = &self.config.job_log_dir {
            tokio::fs::create_dir_all(dir).await?;
            builder = builder.with_log_dir(dir);
        }

        let mut adapters = HashMap::with_capacity(self.registry.len());
        for (job_type, job) in self.registry.iter() {
            let max_fails = policy.max_fails_for(job.as_ref());
            self.queue.set_max_fails(job_type, max_fails).await;
            adapters.insert(
                job_type.to_owned(),
                JobAdapter::new(
                    Arc::clone(job),
                    builder.clone(),
                    Arc::clone(&self.tracker),
                    self.dead_letters.clone(),
                    policy,
                ),
            );
        }
        let adapters: Adapters = Arc::new(adapters);

        for index in 0..self.config.workers {
            let worker = Worker {
                index,
                adapters: Arc::clone(&adapters),
                queue: Arc::clone(&self.queue),
                tracker: Arc::clone(&self.tracker),
                shutdown: self.shutdown.clone(),
                busy: Arc::clone(&self.busy),
            };
            self.workers.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            workers = self.config.workers,
            job_types = self.registry.len(),
            "worker pool started"
        );
        Ok(())
    }

    /// Stop taking new records, wait for running jobs, then settle pending
    /// dead-letter confirmations.
    pub async fn shutdown(mut self) {
        tracing::info!("worker pool shutting down");
        self.shutdown.cancel();

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }

        if self.config.drain_dead_letters_on_shutdown {
            self.dead_letters.drain().await;
        } else {
            self.dead_letters.abandon().await;
        }
        tracing::info!("worker pool stopped");
    }
}

struct Worker {
    index: usize,
    adapters: Adapters,
    queue: Arc<dyn BackingQueue>,
    tracker: Arc<dyn StatusTracker>,
    shutdown: CancellationToken,
    busy: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker = self.index, "worker started");
        loop {
            let record = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                record = self.queue.dequeue() => record,
            };
            self.busy.fetch_add(1, Ordering::Relaxed);
            self.process(record).await;
            self.busy.fetch_sub(1, Ordering::Relaxed);
        }
        tracing::debug!(worker = self.index, "worker stopped");
    }

    async fn process(&self, mut record: JobRecord) {
        let Some(adapter) = self.adapters.get(&record.job_type) else {
            tracing::error!(
                worker = self.index,
                job_id = %record.id,
                job_type = %record.job_type,
                "no job registered for record type, dead-lettering"
            );
            if let Err(e) = self.tracker.set_status(record.id, JobStatus::Error).await {
                tracing::warn!(job_id = %record.id, error = %e, "failed to update job status");
            }
            if let Err(e) = self.queue.dead_letter(record).await {
                tracing::error!(error = %e, "failed to dead-letter record");
            }
            return;
        };

        tracing::debug!(worker = self.index, job_id = %record.id, job_type = %record.job_type, "picked up job");
        let settled = match adapter.run(&mut record).await {
            Ok(()) => self.queue.complete(record).await,
            Err(err) => self.queue.fail(record, &err).await.map(|_| ()),
        };
        if let Err(e) = settled {
            tracing::error!(worker = self.index, error = %e, "failed to settle job record with queue");
        }
    }
}
