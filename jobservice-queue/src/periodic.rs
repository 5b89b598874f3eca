//! Periodic job policies driven by cron expressions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use crate::client::JobQueueClient;
use crate::error::JobQueueError;
use crate::types::{JobRequest, Parameters};

/// A job submitted on a cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodicPolicy {
    pub id: Uuid,
    pub job_type: String,
    /// Cron expression with a leading seconds field, e.g. `0 30 3 * * *`.
    pub cron: String,
    pub parameters: Parameters,
}

fn scheduler_error(e: JobSchedulerError) -> JobQueueError {
    JobQueueError::Scheduler(e.to_string())
}

/// Enqueues a job through a [`JobQueueClient`] every time one of its
/// policies fires.
///
/// Policies live in memory only and are lost on shutdown.
#[derive(Clone)]
pub struct PeriodicScheduler {
    client: JobQueueClient,
    scheduler: JobScheduler,
    policies: Arc<RwLock<HashMap<Uuid, PeriodicPolicy>>>,
}

impl fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl PeriodicScheduler {
    pub async fn new(client: JobQueueClient) -> Result<Self, JobQueueError> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self {
            client,
            scheduler,
            policies: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Start firing policies.
    pub async fn start(&self) -> Result<(), JobQueueError> {
        self.scheduler.start().await.map_err(scheduler_error)?;
        tracing::info!("periodic scheduler started");
        Ok(())
    }

    /// Add a policy and return its id.
    ///
    /// The job type and parameters are checked the same way
    /// [`JobQueueClient::enqueue`] checks them, so a policy never fires a
    /// request that would be refused.
    pub async fn schedule(
        &self,
        job_type: impl Into<String>,
        cron: &str,
        parameters: Parameters,
    ) -> Result<Uuid, JobQueueError> {
        let request = JobRequest::new(job_type, parameters);
        self.client.check(&request)?;

        let client = self.client.clone();
        let fired = request.clone();
        let job = CronJob::new_async(cron, move |policy_id, _scheduler| {
            let client = client.clone();
            let request = fired.clone();
            Box::pin(async move {
                let job_type = request.job_type.clone();
                match client.enqueue(request).await {
                    Ok(result) => tracing::info!(
                        policy_id = %policy_id,
                        job_id = %result.job_id,
                        %job_type,
                        "periodic job enqueued"
                    ),
                    Err(e) => tracing::error!(
                        policy_id = %policy_id,
                        %job_type,
                        error = %e,
                        "failed to enqueue periodic job"
                    ),
                }
            })
        })
        .map_err(|e| JobQueueError::Scheduler(format!("invalid cron expression '{cron}': {e}")))?;

        let mut policies = self.policies.write().await;
        let id = self.scheduler.add(job).await.map_err(scheduler_error)?;
        policies.insert(
            id,
            PeriodicPolicy {
                id,
                job_type: request.job_type.clone(),
                cron: cron.to_owned(),
                parameters: request.parameters,
            },
        );
        tracing::info!(policy_id = %id, job_type = %request.job_type, cron, "periodic policy scheduled");
        Ok(id)
    }

    /// Remove a policy. Jobs it already enqueued are unaffected.
    pub async fn unschedule(&self, id: Uuid) -> Result<(), JobQueueError> {
        let mut policies = self.policies.write().await;
        if policies.remove(&id).is_none() {
            return Err(JobQueueError::PolicyNotFound(id));
        }
        self.scheduler.remove(&id).await.map_err(scheduler_error)?;
        tracing::info!(policy_id = %id, "periodic policy removed");
        Ok(())
    }

    pub async fn policy(&self, id: Uuid) -> Option<PeriodicPolicy> {
        self.policies.read().await.get(&id).cloned()
    }

    /// Every scheduled policy, ordered by job type.
    pub async fn policies(&self) -> Vec<PeriodicPolicy> {
        let mut all: Vec<_> = self.policies.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.job_type.cmp(&b.job_type).then(a.id.cmp(&b.id)));
        all
    }

    /// Stop firing policies.
    pub async fn shutdown(mut self) -> Result<(), JobQueueError> {
        self.scheduler.shutdown().await.map_err(scheduler_error)?;
        tracing::info!("periodic scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NoOpJob;
    use crate::queue::InMemoryQueue;
    use crate::registry::JobRegistry;
    use crate::tracker::InMemoryStatusTracker;
    use serde_json::json;
    use std::time::Duration;

    const NIGHTLY: &str = "0 0 3 * * *";

    async fn scheduler() -> (PeriodicScheduler, Arc<InMemoryQueue>) {
        let mut registry = JobRegistry::new();
        registry.register(NoOpJob::new("gc")).unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let client = JobQueueClient::new(
            Arc::new(registry),
            queue.clone(),
            Arc::new(InMemoryStatusTracker::new()),
        );
        (PeriodicScheduler::new(client).await.unwrap(), queue)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn schedule_and_unschedule() {
        let (sched, _) = scheduler().await;
        let mut params = Parameters::new();
        params.insert("dry_run".into(), json!(true));

        let id = sched.schedule("gc", NIGHTLY, params.clone()).await.unwrap();
        let policy = sched.policy(id).await.expect("policy");
        assert_eq!(policy.job_type, "gc");
        assert_eq!(policy.cron, NIGHTLY);
        assert_eq!(policy.parameters, params);
        assert_eq!(sched.policies().await.len(), 1);

        sched.unschedule(id).await.unwrap();
        assert!(sched.policies().await.is_empty());
        assert!(matches!(
            sched.unschedule(id).await,
            Err(JobQueueError::PolicyNotFound(x)) if x == id
        ));
        sched.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn refuses_bad_policies() {
        let (sched, _) = scheduler().await;

        let err = sched
            .schedule("gc", "every night", Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobQueueError::Scheduler(_)), "{err}");

        let err = sched
            .schedule("replication", NIGHTLY, Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobQueueError::NotRegistered(_)));

        assert!(sched.policies().await.is_empty());
        sched.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn firing_policy_enqueues_jobs() {
        let (sched, queue) = scheduler().await;
        let id = sched
            .schedule("gc", "* * * * * *", Parameters::new())
            .await
            .unwrap();
        sched.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while queue.pending_len().await == 0 {
            assert!(tokio::time::Instant::now() < deadline, "policy never fired");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        sched.unschedule(id).await.unwrap();
        sched.shutdown().await.unwrap();
    }
}
