//! Garbage collection job.

use std::sync::Arc;

use jobservice_queue::{async_trait, ExecutionContext, Job, JobError, Parameters};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::ArtifactStore;
use crate::{job_types, parse_params};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcParams {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub delete_untagged: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct GcReport {
    pub repositories: usize,
    pub deleted: usize,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

/// Removes untagged artifacts from every repository.
///
/// A failed collection is not retried; the next scheduled run picks up
/// whatever this one left behind.
pub struct GarbageCollectionJob {
    store: Arc<dyn ArtifactStore>,
}

impl GarbageCollectionJob {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Job for GarbageCollectionJob {
    fn job_type(&self) -> &str {
        job_types::GC
    }

    fn max_fails(&self) -> u32 {
        1
    }

    fn should_retry(&self) -> bool {
        false
    }

    fn validate(&self, params: &Parameters) -> Result<(), JobError> {
        parse_params::<GcParams>(params).map(|_| ())
    }

    async fn run(&self, ctx: &ExecutionContext, params: &Parameters) -> Result<(), JobError> {
        let params: GcParams = parse_params(params)?;
        let log = ctx.logger();
        let mut report = GcReport {
            dry_run: params.dry_run,
            ..GcReport::default()
        };

        for repository in self.store.repositories().await? {
            ctx.checkpoint().await?;
            report.repositories += 1;
            if !params.delete_untagged {
                continue;
            }

            for artifact in self.store.list(&repository).await? {
                if !artifact.is_untagged() {
                    continue;
                }
                if params.dry_run {
                    log.info(&format!("would delete {}@{}", repository, artifact.digest));
                    report.freed_bytes += artifact.size;
                } else {
                    report.freed_bytes += self.store.delete(&repository, &artifact.digest).await?;
                    log.info(&format!("deleted {}@{}", repository, artifact.digest));
                }
                report.deleted += 1;
            }
        }

        info!(
            job_id = %ctx.job_id(),
            deleted = report.deleted,
            freed_bytes = report.freed_bytes,
            dry_run = report.dry_run,
            "garbage collection finished"
        );
        let summary = serde_json::to_string(&report).map_err(|e| JobError::failed(e.to_string()))?;
        ctx.check_in(&summary).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Artifact, InMemoryArtifactStore};
    use chrono::Utc;
    use jobservice_queue::{ContextBuilder, InMemoryStatusTracker, JobRecord, JobStatus, StatusTracker};
    use serde_json::json;

    async fn seeded() -> InMemoryArtifactStore {
        let store = InMemoryArtifactStore::new();
        store
            .insert(Artifact::new("library/redis", "sha256:01", &["7.2"], Utc::now(), 100))
            .await;
        store
            .insert(Artifact::new("library/redis", "sha256:02", &[], Utc::now(), 30))
            .await;
        store
            .insert(Artifact::new("team/api", "sha256:03", &[], Utc::now(), 12))
            .await;
        store
    }

    async fn run_gc(store: &InMemoryArtifactStore, params: serde_json::Value) -> Option<String> {
        let job = GarbageCollectionJob::new(Arc::new(store.clone()));
        let params = params.as_object().cloned().unwrap_or_default();
        job.validate(&params).unwrap();

        let tracker = Arc::new(InMemoryStatusTracker::new());
        let record = JobRecord::new(job_types::GC, params.clone());
        tracker.set_status(record.id, JobStatus::Running).await.unwrap();
        let ctx = ContextBuilder::new(tracker.clone()).build(&record).unwrap();

        job.run(&ctx, &params).await.unwrap();
        tracker.stats(record.id).await.unwrap().and_then(|s| s.check_in)
    }

    #[test]
    fn gc_is_never_retried() {
        let job = GarbageCollectionJob::new(Arc::new(InMemoryArtifactStore::new()));
        assert_eq!(job.job_type(), "gc");
        assert_eq!(job.max_fails(), 1);
        assert!(!job.should_retry());
    }

    #[tokio::test]
    async fn deletes_untagged_artifacts() {
        let store = seeded().await;
        let summary = run_gc(&store, json!({})).await.unwrap();

        assert_eq!(store.len().await, 1);
        let report: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(report["deleted"], 2);
        assert_eq!(report["freed_bytes"], 42);
        assert_eq!(report["repositories"], 2);
    }

    #[tokio::test]
    async fn dry_run_leaves_store_untouched() {
        let store = seeded().await;
        let summary = run_gc(&store, json!({ "dry_run": true })).await.unwrap();

        assert_eq!(store.len().await, 3);
        assert!(summary.contains("\"dry_run\":true"));
        assert!(summary.contains("\"deleted\":2"));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let job = GarbageCollectionJob::new(Arc::new(InMemoryArtifactStore::new()));
        let params = json!({ "purge_everything": true }).as_object().cloned().unwrap();
        assert!(matches!(
            job.validate(&params),
            Err(JobError::InvalidParameters(_))
        ));
    }
}
