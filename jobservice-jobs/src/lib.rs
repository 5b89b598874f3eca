//! Registry maintenance jobs.
//!
//! This crate provides [`Job`](jobservice_queue::Job) implementations for the
//! job types the registry schedules. All of them operate on an
//! [`ArtifactStore`].
//!
//! # Job Types
//!
//! - `gc` - Remove untagged artifacts (never retried)
//! - `retention.sweep` - Keep the N most recent artifacts of a repository
//! - `image.scan` - Scan one artifact by digest
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobservice_jobs::{register_all_jobs, InMemoryArtifactStore};
//! use jobservice_queue::JobRegistry;
//!
//! let mut registry = JobRegistry::new();
//! register_all_jobs(&mut registry, Arc::new(InMemoryArtifactStore::new())).unwrap();
//! ```

mod error;
mod gc;
mod retention;
mod scan;
mod store;

pub use error::StoreError;
pub use gc::{GarbageCollectionJob, GcParams, GcReport};
pub use retention::{RetentionParams, RetentionResult, RetentionSweepJob};
pub use scan::{ImageScanJob, ScanParams};
pub use store::{Artifact, ArtifactStore, InMemoryArtifactStore};

use std::sync::Arc;

use jobservice_queue::{JobError, JobQueueError, JobRegistry, Parameters};
use serde::de::DeserializeOwned;

/// Register every job type of this crate.
pub fn register_all_jobs(
    registry: &mut JobRegistry,
    store: Arc<dyn ArtifactStore>,
) -> Result<(), JobQueueError> {
    registry.register(GarbageCollectionJob::new(Arc::clone(&store)))?;
    registry.register(RetentionSweepJob::new(Arc::clone(&store)))?;
    registry.register(ImageScanJob::new(store))?;
    Ok(())
}

/// Decode job parameters into their typed form.
pub(crate) fn parse_params<T: DeserializeOwned>(params: &Parameters) -> Result<T, JobError> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| JobError::InvalidParameters(e.to_string()))
}

/// Job type constants for type-safe job references.
pub mod job_types {
    pub const GC: &str = "gc";
    pub const RETENTION_SWEEP: &str = "retention.sweep";
    pub const IMAGE_SCAN: &str = "image.scan";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_job_type_once() {
        let mut registry = JobRegistry::new();
        register_all_jobs(&mut registry, Arc::new(InMemoryArtifactStore::new())).unwrap();

        assert_eq!(registry.len(), 3);
        for job_type in [job_types::GC, job_types::RETENTION_SWEEP, job_types::IMAGE_SCAN] {
            assert!(registry.contains(job_type), "{job_type} missing");
        }

        let again = register_all_jobs(&mut registry, Arc::new(InMemoryArtifactStore::new()));
        assert!(matches!(again, Err(JobQueueError::DuplicateJobType(_))));
    }
}
