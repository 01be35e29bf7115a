//! Admin API endpoints for managing experiments

pub mod experiments;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Create admin API router
pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        .route("/experiments", get(experiments::list_experiments))
        .route("/experiments", post(experiments::create_experiment))
        .route("/experiments/{experiment_id}", get(experiments::get_experiment))
        .route(
            "/experiments/{experiment_id}/results",
            get(experiments::get_experiment_results),
        )
        .route(
            "/experiments/{experiment_id}/start",
            post(experiments::start_experiment),
        )
        .route(
            "/experiments/{experiment_id}/stop",
            post(experiments::stop_experiment),
        )
        .route(
            "/experiments/{experiment_id}/evaluate",
            post(experiments::evaluate_experiment),
        )
        .route(
            "/experiments/{experiment_id}/assign",
            post(experiments::assign_variant),
        )
        .route(
            "/experiments/{experiment_id}/events",
            post(experiments::record_event),
        )
}
