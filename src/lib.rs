//! PMP Split Engine
//!
//! Content split testing with:
//! - Weighted random assignment of content variants
//! - Per-variant engagement counters and derived rates
//! - Two-proportion z-test between leader and runner-up
//! - Automatic completion once a winner is significant

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use infrastructure::{
    experiment::InMemoryExperimentRepository,
    services::{ExperimentService, ExperimentServiceConfig},
};
use tracing::info;

/// Create the application state with default configuration
pub async fn create_app_state() -> anyhow::Result<AppState> {
    create_app_state_with_config(&AppConfig::default()).await
}

/// Create the application state with custom configuration
pub async fn create_app_state_with_config(config: &AppConfig) -> anyhow::Result<AppState> {
    let service_config = ExperimentServiceConfig::from(&config.experiments);

    let repository = Arc::new(InMemoryExperimentRepository::new());
    let experiment_service = ExperimentService::with_config(repository, service_config);

    info!(
        minimum_sample_size = service_config.minimum_sample_size,
        significance_level = service_config.significance_level,
        min_arm_impressions = service_config.min_arm_impressions,
        "Experiment service initialized"
    );

    Ok(AppState::new(Arc::new(experiment_service)))
}
