//! Application state for shared services

use std::sync::Arc;

use crate::infrastructure::services::ExperimentServiceTrait;

/// Application state containing shared services using dynamic dispatch
#[derive(Clone)]
pub struct AppState {
    pub experiment_service: Arc<dyn ExperimentServiceTrait>,
}

impl AppState {
    pub fn new(experiment_service: Arc<dyn ExperimentServiceTrait>) -> Self {
        Self { experiment_service }
    }
}
