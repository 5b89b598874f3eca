//! Deferred dead-letter confirmations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::tracker::StatusTracker;
use crate::types::JobId;

/// Delay before confirming a dead-letter transition to the tracker.
pub const DEFAULT_DEAD_LETTER_GRACE: Duration = Duration::from_secs(2);

/// Confirms dead-letter transitions to the status tracker after a grace
/// delay, so the queue has moved the record to its dead-letter archive by
/// the time the tracker reports it.
///
/// Pending confirmations are tied to the scheduler: [`drain`](Self::drain)
/// waits for them, [`abandon`](Self::abandon) drops them.
#[derive(Clone)]
pub struct DeadLetterScheduler {
    tracker: Arc<dyn StatusTracker>,
    grace: Duration,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DeadLetterScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterScheduler")
            .field("grace", &self.grace)
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl DeadLetterScheduler {
    pub fn new(tracker: Arc<dyn StatusTracker>, grace: Duration) -> Self {
        Self {
            tracker,
            grace,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Number of confirmations still waiting.
    #[inline]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Confirm after the grace delay that `job_id` died at `died_at`.
    pub fn schedule(&self, job_id: JobId, died_at: DateTime<Utc>) {
        let tracker = Arc::clone(&self.tracker);
        let cancel = self.cancel.clone();
        let grace = self.grace;

        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(job_id = %job_id, "dead-letter confirmation abandoned");
                }
                _ = tokio::time::sleep(grace) => {
                    match tracker.mark_dead_at(job_id, died_at).await {
                        Ok(()) => tracing::info!(job_id = %job_id, "job moved to dead-letter state"),
                        Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to record dead-letter state"),
                    }
                }
            }
        });
    }

    /// Wait for every pending confirmation to be delivered.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Drop every pending confirmation.
    pub async fn abandon(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
