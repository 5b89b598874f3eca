//! Artifact store errors.

use jobservice_queue::JobError;
use thiserror::Error;

/// Errors that may occur while reading or mutating registry artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError::Failed(err.to_string())
    }
}
