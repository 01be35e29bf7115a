//! Experiment store abstraction

use async_trait::async_trait;
use std::fmt::Debug;

use super::entity::{Experiment, ExperimentId, ExperimentStatus};
use crate::domain::DomainError;

// ============================================================================
// ExperimentQuery
// ============================================================================

/// Query parameters for listing experiments
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    /// Filter by status
    pub status: Option<ExperimentStatus>,
    /// Filter by external content ID
    pub content_id: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ExperimentQuery {
    /// Create a new query with no filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status
    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by content ID
    pub fn with_content(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Set maximum number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set number of results to skip
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check whether an experiment passes the filters (pagination excluded)
    pub fn matches(&self, experiment: &Experiment) -> bool {
        if let Some(status) = self.status {
            if experiment.status() != status {
                return false;
            }
        }

        if let Some(ref content_id) = self.content_id {
            if experiment.content_id() != content_id {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// ExperimentRepository
// ============================================================================

/// Keyed store for experiments.
///
/// Implementations only need to make each call atomic on its own; the
/// lifecycle manager serializes read-modify-write cycles per experiment.
#[async_trait]
pub trait ExperimentRepository: Send + Sync + Debug {
    /// Get an experiment by ID
    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError>;

    /// Insert or replace an experiment
    async fn put(&self, experiment: Experiment) -> Result<Experiment, DomainError>;

    /// Delete an experiment by ID
    async fn delete(&self, id: &ExperimentId) -> Result<bool, DomainError>;

    /// List experiments with optional filters, newest first
    async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError>;

    /// Check if an experiment exists
    async fn exists(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        Ok(self.get(id).await?.is_some())
    }
}
