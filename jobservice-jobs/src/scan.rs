//! Image scan job.

use std::sync::Arc;

use jobservice_queue::{async_trait, ExecutionContext, Job, JobError, Parameters};
use serde::{Deserialize, Serialize};

use crate::store::ArtifactStore;
use crate::{job_types, parse_params};

const DIGEST_PREFIX: &str = "sha256:";

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    pub digest: String,
}

#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    digest: &'a str,
    repository: &'a str,
    tags: &'a [String],
    size: u64,
}

/// Resolves an artifact by digest and reports what was scanned.
///
/// Uses the service-wide retry budget.
pub struct ImageScanJob {
    store: Arc<dyn ArtifactStore>,
}

impl ImageScanJob {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

fn check_digest(digest: &str) -> Result<(), JobError> {
    let hex = digest
        .strip_prefix(DIGEST_PREFIX)
        .ok_or_else(|| JobError::InvalidParameters(format!("digest must start with {DIGEST_PREFIX}")))?;
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(JobError::InvalidParameters(format!("malformed digest: {digest}")));
    }
    Ok(())
}

#[async_trait]
impl Job for ImageScanJob {
    fn job_type(&self) -> &str {
        job_types::IMAGE_SCAN
    }

    fn should_retry(&self) -> bool {
        true
    }

    fn validate(&self, params: &Parameters) -> Result<(), JobError> {
        let params: ScanParams = parse_params(params)?;
        check_digest(&params.digest)
    }

    async fn run(&self, ctx: &ExecutionContext, params: &Parameters) -> Result<(), JobError> {
        let params: ScanParams = parse_params(params)?;
        ctx.checkpoint().await?;

        // the artifact may still be replicating in; a retry will find it
        let artifact = self
            .store
            .find(&params.digest)
            .await?
            .ok_or_else(|| JobError::failed(format!("artifact {} not found", params.digest)))?;

        ctx.logger().info(&format!(
            "scanning {}@{} ({} bytes)",
            artifact.repository, artifact.digest, artifact.size
        ));
        let report = ScanReport {
            digest: &artifact.digest,
            repository: &artifact.repository,
            tags: &artifact.tags,
            size: artifact.size,
        };
        let report = serde_json::to_string(&report).map_err(|e| JobError::failed(e.to_string()))?;
        ctx.check_in(&report).await;
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

    fn params(digest: &str) -> Parameters {
        json!({ "digest": digest }).as_object().cloned().unwrap()
    }

    #[test]
    fn digest_validation() {
        let job = ImageScanJob::new(Arc::new(InMemoryArtifactStore::new()));
        assert!(job.validate(&params("sha256:0a1b")).is_ok());
        assert!(job.validate(&params("md5:0a1b")).is_err());
        assert!(job.validate(&params("sha256:")).is_err());
        assert!(job.validate(&params("sha256:xyz")).is_err());
        assert!(job.validate(&Parameters::new()).is_err());
        assert_eq!(job.max_fails(), 0);
    }

    #[tokio::test]
    async fn reports_scanned_artifact() {
        let store = InMemoryArtifactStore::new();
        store
            .insert(Artifact::new("library/alpine", "sha256:beef", &["3.20"], Utc::now(), 7))
            .await;
        let job = ImageScanJob::new(Arc::new(store));
        let p = params("sha256:beef");

        let tracker = Arc::new(InMemoryStatusTracker::new());
        let record = JobRecord::new(job_types::IMAGE_SCAN, p.clone());
        tracker.set_status(record.id, JobStatus::Running).await.unwrap();
        let ctx = ContextBuilder::new(tracker.clone()).build(&record).unwrap();

        job.run(&ctx, &p).await.unwrap();
        let check_in = tracker.stats(record.id).await.unwrap().unwrap().check_in.unwrap();
        assert!(check_in.contains("library/alpine"));
    }

    #[tokio::test]
    async fn unknown_digest_is_a_retryable_failure() {
        let job = ImageScanJob::new(Arc::new(InMemoryArtifactStore::new()));
        let p = params("sha256:dead");
        let tracker = Arc::new(InMemoryStatusTracker::new());
        let record = JobRecord::new(job_types::IMAGE_SCAN, p.clone());
        let ctx = ContextBuilder::new(tracker).build(&record).unwrap();

        let err = job.run(&ctx, &p).await.unwrap_err();
        assert!(matches!(err, JobError::Failed(_)));
        assert!(job.should_retry());
    }
}
