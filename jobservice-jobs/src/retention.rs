//! Tag retention sweep over a single repository.

use std::sync::Arc;

use jobservice_queue::{async_trait, ExecutionContext, Job, JobError, Parameters};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{Artifact, ArtifactStore};
use crate::{job_types, parse_params};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionParams {
    pub repository: String,
    /// Number of most recently pushed artifacts to keep.
    pub retain: usize,
    #[serde(default)]
    pub dry_run: bool,
}

/// Decision taken for one candidate artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionResult {
    pub digest: String,
    pub tags: Vec<String>,
    pub retained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RetentionSweepJob {
    store: Arc<dyn ArtifactStore>,
}

impl RetentionSweepJob {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

fn arn(repository: &str, artifact: &Artifact) -> String {
    match artifact.tags.first() {
        Some(tag) => format!("{repository}:{tag}"),
        None => format!("{repository}@{}", artifact.digest),
    }
}

#[async_trait]
impl Job for RetentionSweepJob {
    fn job_type(&self) -> &str {
        job_types::RETENTION_SWEEP
    }

    fn max_fails(&self) -> u32 {
        3
    }

    fn should_retry(&self) -> bool {
        true
    }

    fn validate(&self, params: &Parameters) -> Result<(), JobError> {
        let params: RetentionParams = parse_params(params)?;
        if params.repository.trim().is_empty() {
            return Err(JobError::InvalidParameters("repository must not be empty".into()));
        }
        Ok(())
    }

    async fn run(&self, ctx: &ExecutionContext, params: &Parameters) -> Result<(), JobError> {
        let params: RetentionParams = parse_params(params)?;
        let log = ctx.logger();
        log.info(&format!(
            "retention sweep of {} keeping {} most recent",
            params.repository, params.retain
        ));

        ctx.checkpoint().await?;
        let mut candidates = self.store.list(&params.repository).await?;
        candidates.sort_by(|a, b| b.pushed_at.cmp(&a.pushed_at));
        log.info(&format!(
            "loaded {} candidates from {}",
            candidates.len(),
            params.repository
        ));

        let mut results = Vec::with_capacity(candidates.len());
        for (rank, artifact) in candidates.into_iter().enumerate() {
            ctx.checkpoint().await?;
            let retained = rank < params.retain;
            let mut error = None;

            if !retained && !params.dry_run {
                if let Err(e) = self.store.delete(&params.repository, &artifact.digest).await {
                    warn!(job_id = %ctx.job_id(), digest = %artifact.digest, error = %e, "retention delete failed");
                    log.error(&format!("failed to remove {}: {e}", arn(&params.repository, &artifact)));
                    error = Some(e.to_string());
                }
            }
            log.info(&format!(
                "{} {}",
                arn(&params.repository, &artifact),
                if retained { "retained" } else { "removed" }
            ));

            results.push(RetentionResult {
                digest: artifact.digest,
                tags: artifact.tags,
                retained,
                error,
            });
        }

        let removed = results.iter().filter(|r| !r.retained).count();
        info!(
            job_id = %ctx.job_id(),
            repository = %params.repository,
            removed,
            "retention sweep finished"
        );

        let payload = serde_json::to_string(&results).map_err(|e| JobError::failed(e.to_string()))?;
        ctx.check_in(&payload).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;
    use chrono::{Duration, Utc};
    use jobservice_queue::{
        ContextBuilder, InMemoryStatusTracker, JobRecord, JobStatus, OpCommand, StatusTracker,
    };
    use serde_json::json;

    async fn store_with(count: i64) -> InMemoryArtifactStore {
        let store = InMemoryArtifactStore::new();
        let now = Utc::now();
        for i in 0..count {
            let tag = format!("v{i}");
            store
                .insert(Artifact::new(
                    "library/app",
                    format!("sha256:{i:02}"),
                    &[tag.as_str()],
                    now - Duration::hours(count - i),
                    10,
                ))
                .await;
        }
        store
    }

    fn params(value: serde_json::Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    struct Run {
        tracker: Arc<InMemoryStatusTracker>,
        record: JobRecord,
    }

    impl Run {
        async fn new(params: &Parameters) -> Self {
            let tracker = Arc::new(InMemoryStatusTracker::new());
            let record = JobRecord::new(job_types::RETENTION_SWEEP, params.clone());
            tracker.set_status(record.id, JobStatus::Running).await.unwrap();
            Self { tracker, record }
        }

        fn context(&self) -> ExecutionContext {
            ContextBuilder::new(self.tracker.clone())
                .build(&self.record)
                .unwrap()
        }
    }

    #[test]
    fn validate_requires_repository_and_retain() {
        let job = RetentionSweepJob::new(Arc::new(InMemoryArtifactStore::new()));
        assert!(job.validate(&params(json!({ "repository": "a/b", "retain": 2 }))).is_ok());
        assert!(job.validate(&params(json!({ "retain": 2 }))).is_err());
        assert!(job.validate(&params(json!({ "repository": " ", "retain": 2 }))).is_err());
        assert!(job.validate(&params(json!({ "repository": "a/b", "retain": -1 }))).is_err());
    }

    #[tokio::test]
    async fn keeps_most_recent_and_checks_in_results() {
        let store = store_with(5).await;
        let job = RetentionSweepJob::new(Arc::new(store.clone()));
        let p = params(json!({ "repository": "library/app", "retain": 2 }));
        let run = Run::new(&p).await;

        job.run(&run.context(), &p).await.unwrap();

        let kept: Vec<_> = store
            .list("library/app")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.digest)
            .collect();
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&"sha256:04".to_string()));
        assert!(kept.contains(&"sha256:03".to_string()));

        let check_in = run.tracker.stats(run.record.id).await.unwrap().unwrap().check_in.unwrap();
        let results: Vec<serde_json::Value> = serde_json::from_str(&check_in).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r["retained"] == false).count(), 3);
    }

    #[tokio::test]
    async fn stop_command_ends_the_sweep_early() {
        let store = store_with(3).await;
        let job = RetentionSweepJob::new(Arc::new(store.clone()));
        let p = params(json!({ "repository": "library/app", "retain": 0 }));
        let run = Run::new(&p).await;
        run.tracker
            .send_command(run.record.id, OpCommand::Stop)
            .await
            .unwrap();

        let err = job.run(&run.context(), &p).await.unwrap_err();
        assert!(matches!(err, JobError::Stopped));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn missing_repository_fails_the_run() {
        let job = RetentionSweepJob::new(Arc::new(InMemoryArtifactStore::new()));
        let p = params(json!({ "repository": "ghost/repo", "retain": 1 }));
        let run = Run::new(&p).await;

        let err = job.run(&run.context(), &p).await.unwrap_err();
        assert!(matches!(err, JobError::Failed(m) if m.contains("ghost/repo")));
    }
}
