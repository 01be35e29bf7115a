//! In-memory implementation of the experiment repository

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::experiment::{Experiment, ExperimentId, ExperimentQuery, ExperimentRepository};
use crate::domain::DomainError;

/// In-memory experiment repository implementation
#[derive(Debug)]
pub struct InMemoryExperimentRepository {
    experiments: RwLock<HashMap<String, Experiment>>,
}

impl InMemoryExperimentRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
        }
    }

    /// Create a repository with initial experiments
    pub fn with_experiments(experiments: Vec<Experiment>) -> Self {
        let map = experiments
            .into_iter()
            .map(|experiment| (experiment.id().as_str().to_string(), experiment))
            .collect();

        Self {
            experiments: RwLock::new(map),
        }
    }
}

impl Default for InMemoryExperimentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(experiments.get(id.as_str()).cloned())
    }

    async fn put(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
        let id = experiment.id().as_str().to_string();
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        experiments.insert(id, experiment.clone());
        Ok(experiment)
    }

    async fn delete(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        Ok(experiments.remove(id.as_str()).is_some())
    }

    async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut results: Vec<_> = experiments
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        // Sort by created_at descending
        results.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        // Apply pagination
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn exists(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(experiments.contains_key(id.as_str()))
    }
}
