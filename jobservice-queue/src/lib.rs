//! Job execution core.
//!
//! This crate turns queued job records into monitored, retry-bounded runs of
//! [`Job`] implementations. It provides in-memory implementations of the
//! backing queue and status tracker so a single process can be wired together
//! and exercised without provisioning the real infrastructure.
//!
//! # Architecture
//!
//! - [`Job`] - The contract every job type implements
//! - [`ExecutionContext`] - Logger, check-in and control polling of one run
//! - [`StatusTracker`] - Authoritative per-job status store
//! - [`JobAdapter`] - Status transitions, panic containment, retry/dead-letter
//! - [`WorkerPool`] - Fixed set of workers pulling from a [`BackingQueue`]
//! - [`JobQueueClient`] - Enqueue jobs, send stop/cancel commands, read job logs
//! - [`PeriodicScheduler`] - Enqueue jobs on cron schedules
//!
//! Execution is at-least-once. Cancellation is cooperative: jobs poll
//! [`ExecutionContext::checkpoint`] and nothing interrupts a job that does not.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobservice_queue::{
//!     async_trait, ExecutionContext, InMemoryQueue, InMemoryStatusTracker, Job, JobError,
//!     JobQueueClient, JobRegistry, JobRequest, Parameters, WorkerPool, WorkerPoolConfig,
//! };
//!
//! struct MyJob;
//!
//! #[async_trait]
//! impl Job for MyJob {
//!     fn job_type(&self) -> &str {
//!         "my.job"
//!     }
//!
//!     fn should_retry(&self) -> bool {
//!         true
//!     }
//!
//!     async fn run(&self, ctx: &ExecutionContext, params: &Parameters) -> Result<(), JobError> {
//!         ctx.checkpoint().await?;
//!         ctx.logger().info(&format!("running with {} parameters", params.len()));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = JobRegistry::new();
//!     registry.register(MyJob).unwrap();
//!     let registry = Arc::new(registry);
//!
//!     let queue = Arc::new(InMemoryQueue::new());
//!     let tracker = Arc::new(InMemoryStatusTracker::new());
//!
//!     let mut pool = WorkerPool::new(
//!         WorkerPoolConfig::default(),
//!         registry.clone(),
//!         queue.clone(),
//!         tracker.clone(),
//!     );
//!     pool.start().await.unwrap();
//!
//!     let client = JobQueueClient::new(registry, queue, tracker);
//!     let result = client
//!         .enqueue(JobRequest::new("my.job", Parameters::new()))
//!         .await
//!         .unwrap();
//!     println!("Enqueued job: {}", result.job_id);
//!
//!     pool.shutdown().await;
//! }
//! ```

mod adapter;
mod client;
mod context;
mod dead_letter;
mod error;
mod job;
mod logger;
mod periodic;
mod pool;
mod queue;
mod registry;
mod tracker;
mod types;

pub use adapter::{JobAdapter, RetryPolicy};
pub use client::JobQueueClient;
pub use context::{ContextBuilder, ExecutionContext, JobControl, LoggerFactory};
pub use dead_letter::{DeadLetterScheduler, DEFAULT_DEAD_LETTER_GRACE};
pub use error::{FailureKind, JobError, JobQueueError};
pub use job::{Job, NoOpJob, DEFAULT_MAX_FAILS};
pub use logger::{FileJobLogger, JobLogger, TracingJobLogger};
pub use periodic::{PeriodicPolicy, PeriodicScheduler};
pub use pool::{PoolStatus, WorkerPool, WorkerPoolConfig};
pub use queue::{BackingQueue, DeadJob, FailDisposition, InMemoryQueue, QueueStats, MAX_DEAD};
pub use registry::JobRegistry;
pub use tracker::{InMemoryStatusTracker, StatusTracker};
pub use types::{
    EnqueueResult, JobId, JobRecord, JobRequest, JobStats, JobStatus, OpCommand, Parameters,
    DEAD_LETTER_FAILS,
};

// Re-export async_trait for convenience when implementing Job
pub use async_trait::async_trait;
