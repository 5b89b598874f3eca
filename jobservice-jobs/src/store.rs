//! Artifact storage the maintenance jobs operate on.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// A manifest stored in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub repository: String,
    pub digest: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub pushed_at: DateTime<Utc>,
    pub size: u64,
}

impl Artifact {
    pub fn new(
        repository: impl Into<String>,
        digest: impl Into<String>,
        tags: &[&str],
        pushed_at: DateTime<Utc>,
        size: u64,
    ) -> Self {
        Self {
            repository: repository.into(),
            digest: digest.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            pushed_at,
            size,
        }
    }

    #[inline]
    pub fn is_untagged(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Access to the registry's artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn repositories(&self) -> Result<Vec<String>, StoreError>;

    async fn list(&self, repository: &str) -> Result<Vec<Artifact>, StoreError>;

    async fn find(&self, digest: &str) -> Result<Option<Artifact>, StoreError>;

    /// Remove an artifact, returning the bytes freed.
    async fn delete(&self, repository: &str, digest: &str) -> Result<u64, StoreError>;
}

/// Artifact store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    repos: Arc<RwLock<BTreeMap<String, Vec<Artifact>>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, artifact: Artifact) {
        let mut repos = self.repos.write().await;
        let artifacts = repos.entry(artifact.repository.clone()).or_default();
        artifacts.retain(|a| a.digest != artifact.digest);
        artifacts.push(artifact);
    }

    pub async fn len(&self) -> usize {
        self.repos.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn repositories(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.repos.read().await.keys().cloned().collect())
    }

    async fn list(&self, repository: &str) -> Result<Vec<Artifact>, StoreError> {
        self.repos
            .read()
            .await
            .get(repository)
            .cloned()
            .ok_or_else(|| StoreError::RepositoryNotFound(repository.to_string()))
    }

    async fn find(&self, digest: &str) -> Result<Option<Artifact>, StoreError> {
        let repos = self.repos.read().await;
        Ok(repos
            .values()
            .flatten()
            .find(|a| a.digest == digest)
            .cloned())
    }

    async fn delete(&self, repository: &str, digest: &str) -> Result<u64, StoreError> {
        let mut repos = self.repos.write().await;
        let artifacts = repos
            .get_mut(repository)
            .ok_or_else(|| StoreError::RepositoryNotFound(repository.to_string()))?;
        let index = artifacts
            .iter()
            .position(|a| a.digest == digest)
            .ok_or_else(|| StoreError::ArtifactNotFound(digest.to_string()))?;
        Ok(artifacts.remove(index).size)
    }
}
