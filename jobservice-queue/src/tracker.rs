//! Status tracking contract and the in-memory reference implementation.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::JobQueueError;
use crate::types::{JobId, JobStats, JobStatus, OpCommand};

/// Authoritative record of each job's state.
///
/// Implementations must be safe to share between all workers and give
/// read-your-writes consistency per job id. Writes are last-writer-wins.
#[async_trait]
pub trait StatusTracker: Send + Sync {
    async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), JobQueueError>;

    /// Pending operator command for the job, if any.
    async fn ctl_command(&self, job_id: JobId) -> Result<Option<OpCommand>, JobQueueError>;

    async fn check_in(&self, job_id: JobId, message: &str) -> Result<(), JobQueueError>;

    /// Record that the job reached the dead-letter state at `at`.
    async fn mark_dead_at(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), JobQueueError>;

    /// Issue an operator command to the job.
    async fn send_command(&self, job_id: JobId, command: OpCommand) -> Result<(), JobQueueError>;

    async fn stats(&self, job_id: JobId) -> Result<Option<JobStats>, JobQueueError>;
}

/// Number of jobs whose stats are kept in memory. Jobs still in flight are
/// never evicted, so the tracker may briefly hold more.
const MAX_TRACKED_JOBS: usize = 10_000;

/// Whether nothing will write to these stats again except an operator read.
fn is_settled(stats: &JobStats) -> bool {
    match stats.status {
        JobStatus::Success | JobStatus::Stopped => true,
        JobStatus::Error | JobStatus::Cancelled => stats.die_at.is_some(),
        JobStatus::Pending | JobStatus::Running => false,
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Job ids in first-seen order (oldest first).
    order: VecDeque<JobId>,
    stats: HashMap<JobId, JobStats>,
}

impl TrackerState {
    /// Get the stats of a job, creating a pending entry on first sight.
    fn entry(&mut self, job_id: JobId) -> &mut JobStats {
        if !self.stats.contains_key(&job_id) {
            self.stats
                .insert(job_id, JobStats::new(job_id, JobStatus::Pending));
            self.order.push_back(job_id);
            self.evict();
        }
        self.stats
            .entry(job_id)
            .or_insert_with(|| JobStats::new(job_id, JobStatus::Pending))
    }

    fn existing(&mut self, job_id: JobId) -> Result<&mut JobStats, JobQueueError> {
        self.stats
            .get_mut(&job_id)
            .ok_or(JobQueueError::NotFound(job_id))
    }

    /// Drop the oldest settled entries until back under the limit.
    fn evict(&mut self) {
        let mut index = 0;
        while self.order.len() > MAX_TRACKED_JOBS && index < self.order.len() {
            let id = self.order[index];
            match self.stats.get(&id) {
                Some(stats) if !is_settled(stats) => index += 1,
                _ => {
                    self.order.remove(index);
                    self.stats.remove(&id);
                }
            }
        }
    }
}

/// In-memory [`StatusTracker`] for single-process deployments and tests.
#[derive(Clone, Default)]
pub struct InMemoryStatusTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl fmt::Debug for InMemoryStatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStatusTracker")
            .field("state", &"<RwLock<TrackerState>>")
            .finish()
    }
}

impl InMemoryStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently tracked.
    pub async fn len(&self) -> usize {
        self.state.read().await.stats.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StatusTracker for InMemoryStatusTracker {
    async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), JobQueueError> {
        let mut state = self.state.write().await;
        let stats = state.entry(job_id);
        stats.status = status;
        stats.updated_at = Utc::now();
        // a finished run has consumed (or outlived) any pending command
        if !matches!(status, JobStatus::Pending | JobStatus::Running) {
            stats.command = None;
        }
        Ok(())
    }

    async fn ctl_command(&self, job_id: JobId) -> Result<Option<OpCommand>, JobQueueError> {
        let state = self.state.read().await;
        Ok(state.stats.get(&job_id).and_then(|s| s.command))
    }

    async fn check_in(&self, job_id: JobId, message: &str) -> Result<(), JobQueueError> {
        let mut state = self.state.write().await;
        let stats = state.existing(job_id)?;
        let now = Utc::now();
        stats.check_in = Some(message.to_owned());
        stats.check_in_at = Some(now);
        stats.updated_at = now;
        Ok(())
    }

    async fn mark_dead_at(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), JobQueueError> {
        let mut state = self.state.write().await;
        let stats = state.existing(job_id)?;
        stats.die_at = Some(at);
        stats.updated_at = Utc::now();
        Ok(())
    }

    async fn send_command(&self, job_id: JobId, command: OpCommand) -> Result<(), JobQueueError> {
        let mut state = self.state.write().await;
        let stats = state.existing(job_id)?;
        stats.command = Some(command);
        stats.updated_at = Utc::now();
        Ok(())
    }

    async fn stats(&self, job_id: JobId) -> Result<Option<JobStats>, JobQueueError> {
        let state = self.state.read().await;
        Ok(state.stats.get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn last_writer_wins() {
        let tracker = InMemoryStatusTracker::new();
        let id = Uuid::new_v4();
        tracker.set_status(id, JobStatus::Running).await.unwrap();
        tracker.set_status(id, JobStatus::Error).await.unwrap();
        tracker.set_status(id, JobStatus::Running).await.unwrap();

        let stats = tracker.stats(id).await.unwrap().unwrap();
        assert_eq!(stats.status, JobStatus::Running);
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn commands_require_a_known_job() {
        let tracker = InMemoryStatusTracker::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            tracker.send_command(id, OpCommand::Stop).await,
            Err(JobQueueError::NotFound(_))
        ));
        assert_eq!(tracker.ctl_command(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn finished_run_clears_command() {
        let tracker = InMemoryStatusTracker::new();
        let id = Uuid::new_v4();
        tracker.set_status(id, JobStatus::Pending).await.unwrap();
        tracker.send_command(id, OpCommand::Stop).await.unwrap();

        tracker.set_status(id, JobStatus::Running).await.unwrap();
        assert_eq!(tracker.ctl_command(id).await.unwrap(), Some(OpCommand::Stop));

        tracker.set_status(id, JobStatus::Stopped).await.unwrap();
        assert_eq!(tracker.ctl_command(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dead_at_is_recorded() {
        let tracker = InMemoryStatusTracker::new();
        let id = Uuid::new_v4();
        let at = Utc::now();
        tracker.set_status(id, JobStatus::Error).await.unwrap();
        tracker.mark_dead_at(id, at).await.unwrap();

        let stats = tracker.stats(id).await.unwrap().unwrap();
        assert_eq!(stats.die_at, Some(at));
        assert_eq!(stats.status, JobStatus::Error);
    }

    #[tokio::test]
    async fn late_writes_never_create_entries() {
        let tracker = InMemoryStatusTracker::new();
        let id = Uuid::new_v4();

        assert!(matches!(
            tracker.mark_dead_at(id, Utc::now()).await,
            Err(JobQueueError::NotFound(_))
        ));
        assert!(matches!(
            tracker.check_in(id, "50%").await,
            Err(JobQueueError::NotFound(_))
        ));
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn oldest_entries_are_evicted() {
        let tracker = InMemoryStatusTracker::new();
        let first = Uuid::new_v4();
        tracker.set_status(first, JobStatus::Success).await.unwrap();
        for _ in 0..MAX_TRACKED_JOBS {
            tracker
                .set_status(Uuid::new_v4(), JobStatus::Pending)
                .await
                .unwrap();
        }
        assert_eq!(tracker.len().await, MAX_TRACKED_JOBS);
        assert!(tracker.stats(first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn running_jobs_survive_eviction() {
        let tracker = InMemoryStatusTracker::new();
        let running = Uuid::new_v4();
        tracker.set_status(running, JobStatus::Running).await.unwrap();
        for _ in 0..MAX_TRACKED_JOBS {
            tracker
                .set_status(Uuid::new_v4(), JobStatus::Pending)
                .await
                .unwrap();
        }

        // nothing settled to evict yet
        assert_eq!(tracker.len().await, MAX_TRACKED_JOBS + 1);
        let stats = tracker.stats(running).await.unwrap().unwrap();
        assert_eq!(stats.status, JobStatus::Running);
        tracker.send_command(running, OpCommand::Stop).await.unwrap();

        // once dead-lettered it is the first to go
        let at = Utc::now();
        tracker.set_status(running, JobStatus::Error).await.unwrap();
        tracker.mark_dead_at(running, at).await.unwrap();
        let stats = tracker.stats(running).await.unwrap().unwrap();
        assert_eq!(stats.status, JobStatus::Error);
        assert_eq!(stats.die_at, Some(at));

        tracker
            .set_status(Uuid::new_v4(), JobStatus::Pending)
            .await
            .unwrap();
        assert!(tracker.stats(running).await.unwrap().is_none());
        assert_eq!(tracker.len().await, MAX_TRACKED_JOBS + 1);
        let state = tracker.state.read().await;
        assert_eq!(state.order.len(), state.stats.len());
    }

    #[tokio::test]
    async fn retried_error_is_not_settled() {
        let tracker = InMemoryStatusTracker::new();
        let retrying = Uuid::new_v4();
        tracker.set_status(retrying, JobStatus::Error).await.unwrap();
        for _ in 0..MAX_TRACKED_JOBS {
            tracker
                .set_status(Uuid::new_v4(), JobStatus::Success)
                .await
                .unwrap();
        }
        assert!(tracker.stats(retrying).await.unwrap().is_some());
        assert_eq!(tracker.len().await, MAX_TRACKED_JOBS);
    }
}
