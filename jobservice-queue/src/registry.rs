//! Registry of the job types a process knows how to run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::JobQueueError;
use crate::job::Job;

/// Maps job type names to their implementations.
///
/// Built once at process start and shared (behind an `Arc`) with the worker
/// pool and the submission client.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.jobs.keys().collect();
        types.sort();
        f.debug_struct("JobRegistry").field("types", &types).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job implementation under its own type name.
    pub fn register<J: Job + 'static>(&mut self, job: J) -> Result<(), JobQueueError> {
        self.register_arc(Arc::new(job))
    }

    pub fn register_arc(&mut self, job: Arc<dyn Job>) -> Result<(), JobQueueError> {
        let job_type = job.job_type().to_owned();
        if self.jobs.contains_key(&job_type) {
            return Err(JobQueueError::DuplicateJobType(job_type));
        }
        tracing::debug!(job_type = %job_type, "registered job type");
        self.jobs.insert(job_type, job);
        Ok(())
    }

    #[inline]
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(job_type).cloned()
    }

    #[inline]
    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Job>)> {
        self.jobs.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NoOpJob;

    #[test]
    fn rejects_duplicate_types() {
        let mut registry = JobRegistry::new();
        registry.register(NoOpJob::new("gc")).unwrap();
        let err = registry.register(NoOpJob::new("gc")).unwrap_err();
        assert!(matches!(err, JobQueueError::DuplicateJobType(t) if t == "gc"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn looks_up_by_type_name() {
        let mut registry = JobRegistry::new();
        registry.register(NoOpJob::new("image.scan")).unwrap();
        assert!(registry.contains("image.scan"));
        assert_eq!(registry.get("image.scan").unwrap().job_type(), "image.scan");
        assert!(registry.get("replication").is_none());
    }
}
