//! Backing queue contract and the in-memory reference implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{JobError, JobQueueError};
use crate::job::DEFAULT_MAX_FAILS;
use crate::types::{JobId, JobRecord};

/// What the queue did with a failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Put back for another attempt.
    Requeued,
    /// Budget exhausted; moved to the dead-letter archive.
    Dead,
}

/// Work queue the worker pool pulls records from.
///
/// The queue owns the failure counter and the retry loop: a failed record
/// goes back for another attempt until its counter reaches the max-fails
/// threshold of its type, after which it is dead-lettered. Each record is
/// handed to at most one worker at a time.
#[async_trait]
pub trait BackingQueue: Send + Sync {
    async fn push(&self, record: JobRecord) -> Result<(), JobQueueError>;

    /// Wait for the next record.
    ///
    /// Must be cancel safe: dropping the future never loses a record.
    async fn dequeue(&self) -> JobRecord;

    /// The record finished without requesting a retry.
    async fn complete(&self, record: JobRecord) -> Result<(), JobQueueError>;

    /// Count a failed attempt, then requeue or dead-letter the record.
    async fn fail(
        &self,
        record: JobRecord,
        error: &JobError,
    ) -> Result<FailDisposition, JobQueueError>;

    /// Move the record straight to the dead-letter archive.
    async fn dead_letter(&self, record: JobRecord) -> Result<(), JobQueueError>;

    /// Set the retry threshold for a job type.
    async fn set_max_fails(&self, job_type: &str, max_fails: u32);

    /// Record counts per state.
    async fn stats(&self) -> Result<QueueStats, JobQueueError>;
}

/// Snapshot of how many records a queue holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub completed: usize,
    pub dead: usize,
}

/// Maximum number of completed records kept in the archive.
const MAX_COMPLETED: usize = 1000;

/// Maximum number of dead-lettered records kept; the oldest go first.
pub const MAX_DEAD: usize = 1000;

/// A record moved to the dead-letter archive, with the last error seen.
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub record: JobRecord,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<JobRecord>,
    completed: VecDeque<JobRecord>,
    dead: VecDeque<DeadJob>,
    dead_ids: HashSet<JobId>,
    max_fails: HashMap<String, u32>,
}

impl QueueState {
    fn threshold(&self, record: &JobRecord) -> u64 {
        let by_type = self
            .max_fails
            .get(&record.job_type)
            .copied()
            .unwrap_or(DEFAULT_MAX_FAILS);
        u64::from(record.max_fails.filter(|n| *n > 0).unwrap_or(by_type))
    }

    fn archive(&mut self, record: JobRecord) {
        self.completed.push_back(record);
        while self.completed.len() > MAX_COMPLETED {
            self.completed.pop_front();
        }
    }

    fn bury(&mut self, record: JobRecord, last_error: Option<String>) {
        self.dead_ids.insert(record.id);
        self.dead.push_back(DeadJob { record, last_error });
        while self.dead.len() > MAX_DEAD {
            if let Some(old) = self.dead.pop_front() {
                self.dead_ids.remove(&old.record.id);
            }
        }
    }
}

/// In-memory FIFO [`BackingQueue`].
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    available: Arc<Notify>,
}

impl fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("state", &"<Mutex<QueueState>>")
            .finish()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Completed records, most recent first.
    pub async fn completed(&self) -> Vec<JobRecord> {
        let state = self.state.lock().await;
        state.completed.iter().rev().cloned().collect()
    }

    /// Dead-lettered records, oldest first.
    pub async fn dead_jobs(&self) -> Vec<DeadJob> {
        self.state.lock().await.dead.iter().cloned().collect()
    }

    pub async fn is_dead(&self, job_id: JobId) -> bool {
        self.state.lock().await.dead_ids.contains(&job_id)
    }
}

#[async_trait]
impl BackingQueue for InMemoryQueue {
    async fn push(&self, record: JobRecord) -> Result<(), JobQueueError> {
        self.state.lock().await.pending.push_back(record);
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> JobRecord {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(record) = state.pending.pop_front() {
                    // Notify keeps a single permit, pass it on to the next waiter.
                    if !state.pending.is_empty() {
                        self.available.notify_one();
                    }
                    return record;
                }
            }
            self.available.notified().await;
        }
    }

    async fn complete(&self, record: JobRecord) -> Result<(), JobQueueError> {
        tracing::debug!(job_id = %record.id, job_type = %record.job_type, "job record completed");
        self.state.lock().await.archive(record);
        Ok(())
    }

    async fn fail(
        &self,
        mut record: JobRecord,
        error: &JobError,
    ) -> Result<FailDisposition, JobQueueError> {
        record.fails = record.fails.saturating_add(1);

        let mut state = self.state.lock().await;
        let threshold = state.threshold(&record);
        if record.fails >= threshold {
            tracing::warn!(
                job_id = %record.id,
                job_type = %record.job_type,
                fails = record.fails.min(threshold),
                max_fails = threshold,
                "retry budget exhausted, moving job to dead-letter queue"
            );
            state.bury(record, Some(error.to_string()));
            return Ok(FailDisposition::Dead);
        }

        tracing::info!(
            job_id = %record.id,
            job_type = %record.job_type,
            fails = record.fails,
            max_fails = threshold,
            "requeueing failed job"
        );
        state.pending.push_back(record);
        drop(state);
        self.available.notify_one();
        Ok(FailDisposition::Requeued)
    }

    async fn dead_letter(&self, record: JobRecord) -> Result<(), JobQueueError> {
        self.state.lock().await.bury(record, None);
        Ok(())
    }

    async fn set_max_fails(&self, job_type: &str, max_fails: u32) {
        let mut state = self.state.lock().await;
        state.max_fails.insert(job_type.to_owned(), max_fails);
    }

    async fn stats(&self) -> Result<QueueStats, JobQueueError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            pending: state.pending.len(),
            completed: state.completed.len(),
            dead: state.dead.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Parameters, DEAD_LETTER_FAILS};
    use std::time::Duration;

    fn record(job_type: &str) -> JobRecord {
        JobRecord::new(job_type, Parameters::new())
    }

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let queue = InMemoryQueue::new();
        let (a, b) = (record("scan"), record("scan"));
        queue.push(a.clone()).await.unwrap();
        queue.push(b.clone()).await.unwrap();

        assert_eq!(queue.dequeue().await.id, a.id);
        assert_eq!(queue.dequeue().await.id, b.id);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn dequeue_waits_for_push() {
        let queue = InMemoryQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let rec = record("gc");
        queue.push(rec.clone()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue woke up")
            .unwrap();
        assert_eq!(got.id, rec.id);
    }

    #[tokio::test]
    async fn failures_requeue_until_budget_is_spent() {
        let queue = InMemoryQueue::new();
        queue.set_max_fails("sweep", 2).await;
        queue.push(record("sweep")).await.unwrap();
        let err = JobError::failed("registry timeout");

        let rec = queue.dequeue().await;
        assert_eq!(queue.fail(rec, &err).await.unwrap(), FailDisposition::Requeued);

        let rec = queue.dequeue().await;
        assert_eq!(rec.fails, 1);
        assert_eq!(queue.fail(rec, &err).await.unwrap(), FailDisposition::Dead);

        let dead = queue.dead_jobs().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].record.fails, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("registry timeout"));
    }

    #[tokio::test]
    async fn sentinel_counter_dead_letters_immediately() {
        let queue = InMemoryQueue::new();
        let mut rec = record("gc");
        rec.fails = DEAD_LETTER_FAILS;
        let disposition = queue
            .fail(rec.clone(), &JobError::failed("x"))
            .await
            .unwrap();
        assert_eq!(disposition, FailDisposition::Dead);
        assert!(queue.is_dead(rec.id).await);
    }

    #[tokio::test]
    async fn record_override_beats_type_threshold() {
        let queue = InMemoryQueue::new();
        queue.set_max_fails("scan", 1).await;
        let mut rec = record("scan");
        rec.max_fails = Some(3);
        let disposition = queue.fail(rec, &JobError::failed("x")).await.unwrap();
        assert_eq!(disposition, FailDisposition::Requeued);
    }

    #[tokio::test]
    async fn completed_records_are_archived() {
        let queue = InMemoryQueue::new();
        let rec = record("scan");
        queue.complete(rec.clone()).await.unwrap();
        assert_eq!(queue.completed().await[0].id, rec.id);
        assert!(!queue.is_dead(rec.id).await);
    }

    #[tokio::test]
    async fn dead_archive_drops_oldest_records() {
        let queue = InMemoryQueue::new();
        let first = record("scan");
        queue.dead_letter(first.clone()).await.unwrap();
        for _ in 0..MAX_DEAD {
            queue.dead_letter(record("scan")).await.unwrap();
        }

        assert!(!queue.is_dead(first.id).await);
        let dead = queue.dead_jobs().await;
        assert_eq!(dead.len(), MAX_DEAD);
        assert!(queue.is_dead(dead[0].record.id).await);
        assert_eq!(queue.stats().await.unwrap().dead, MAX_DEAD);
    }

    #[tokio::test]
    async fn stats_count_each_archive() {
        let queue = InMemoryQueue::new();
        queue.push(record("gc")).await.unwrap();
        queue.push(record("gc")).await.unwrap();
        queue.complete(record("gc")).await.unwrap();
        queue.dead_letter(record("gc")).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 2,
                completed: 1,
                dead: 1
            }
        );
    }
}
