//! Experiment (split test) admin endpoints

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::experiment::{
    EvaluationResult, EventKind, Experiment, ExperimentQuery, ExperimentReport, ExperimentStatus,
    PrimaryMetric, VariantCounters, VariantDefinition, VariantRates,
};
use crate::infrastructure::services::CreateExperimentRequest;

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a new experiment
#[derive(Debug, Clone, Deserialize)]
pub struct CreateExperimentApiRequest {
    pub name: String,
    pub content_id: String,
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
    pub primary_metric: PrimaryMetric,
    #[serde(default)]
    pub traffic_split: Option<Vec<f64>>,
    #[serde(default)]
    pub minimum_sample_size: Option<u64>,
    #[serde(default)]
    pub significance_level: Option<f64>,
}

/// Query parameters for listing experiments
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListExperimentsQuery {
    pub status: Option<String>,
    pub content_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One engagement event
#[derive(Debug, Clone, Deserialize)]
pub struct RecordEventApiRequest {
    pub variant_id: String,
    pub kind: EventKind,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentResponse {
    pub id: String,
    pub name: String,
    pub content_id: String,
    pub status: ExperimentStatus,
    pub primary_metric: PrimaryMetric,
    pub variants: Vec<VariantResponse>,
    pub traffic_split: Vec<f64>,
    pub minimum_sample_size: u64,
    pub current_sample_size: u64,
    pub significance_level: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub winner: Option<String>,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EvaluationResult>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub changes: BTreeMap<String, String>,
    pub counters: VariantCounters,
    pub rates: VariantRates,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListExperimentsResponse {
    pub experiments: Vec<ExperimentResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResponse {
    pub experiment_id: String,
    pub variant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResponse {
    pub experiment_id: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
}

// ============================================================================
// Conversion Implementations
// ============================================================================

fn parse_status(s: &str) -> Result<ExperimentStatus, ApiError> {
    match s.to_lowercase().as_str() {
        "draft" => Ok(ExperimentStatus::Draft),
        "running" => Ok(ExperimentStatus::Running),
        "paused" => Ok(ExperimentStatus::Paused),
        "completed" => Ok(ExperimentStatus::Completed),
        other => Err(ApiError::bad_request(format!(
            "Invalid status '{}'. Valid values: draft, running, paused, completed",
            other
        ))
        .with_param("status")),
    }
}

impl From<&Experiment> for ExperimentResponse {
    fn from(experiment: &Experiment) -> Self {
        Self {
            id: experiment.id().to_string(),
            name: experiment.name().to_string(),
            content_id: experiment.content_id().to_string(),
            status: experiment.status(),
            primary_metric: experiment.primary_metric(),
            variants: experiment
                .variants()
                .iter()
                .map(|v| VariantResponse {
                    id: v.id().to_string(),
                    name: v.name().to_string(),
                    description: v.description().map(|s| s.to_string()),
                    changes: v.changes().clone(),
                    counters: *v.counters(),
                    rates: *v.rates(),
                })
                .collect(),
            traffic_split: experiment.traffic_split().to_vec(),
            minimum_sample_size: experiment.minimum_sample_size(),
            current_sample_size: experiment.current_sample_size(),
            significance_level: experiment.significance_level(),
            start_date: experiment.start_date().map(|t| t.to_rfc3339()),
            end_date: experiment.end_date().map(|t| t.to_rfc3339()),
            winner: experiment.winner().map(|w| w.to_string()),
            confidence: experiment.confidence(),
            outcome: experiment.outcome().cloned(),
            created_at: experiment.created_at().to_rfc3339(),
            updated_at: experiment.updated_at().to_rfc3339(),
        }
    }
}

impl From<CreateExperimentApiRequest> for CreateExperimentRequest {
    fn from(request: CreateExperimentApiRequest) -> Self {
        Self {
            name: request.name,
            content_id: request.content_id,
            variants: request.variants,
            primary_metric: request.primary_metric,
            traffic_split: request.traffic_split,
            minimum_sample_size: request.minimum_sample_size,
            significance_level: request.significance_level,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /admin/experiments
pub async fn list_experiments(
    State(state): State<AppState>,
    Query(params): Query<ListExperimentsQuery>,
) -> Result<Json<ListExperimentsResponse>, ApiError> {
    debug!("Admin listing experiments");

    let mut query = ExperimentQuery::new();

    if let Some(ref status) = params.status {
        query = query.with_status(parse_status(status)?);
    }

    if let Some(content_id) = params.content_id {
        query = query.with_content(content_id);
    }

    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }

    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    let experiments = state.experiment_service.find_experiments(&query).await?;

    let responses: Vec<ExperimentResponse> =
        experiments.iter().map(ExperimentResponse::from).collect();
    let total = responses.len();

    Ok(Json(ListExperimentsResponse {
        experiments: responses,
        total,
    }))
}

/// POST /admin/experiments
pub async fn create_experiment(
    State(state): State<AppState>,
    Json(request): Json<CreateExperimentApiRequest>,
) -> Result<(StatusCode, Json<ExperimentResponse>), ApiError> {
    debug!(content_id = %request.content_id, "Admin creating experiment");

    let experiment = state
        .experiment_service
        .create_experiment(request.into())
        .await?;

    Ok((StatusCode::CREATED, Json(ExperimentResponse::from(&experiment))))
}

/// GET /admin/experiments/{id}
pub async fn get_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentResponse>, ApiError> {
    debug!(experiment_id = %experiment_id, "Admin getting experiment");

    let experiment = state
        .experiment_service
        .get_experiment(&experiment_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("Experiment '{}' not found", experiment_id))
        })?;

    Ok(Json(ExperimentResponse::from(&experiment)))
}

/// GET /admin/experiments/{id}/results
pub async fn get_experiment_results(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentReport>, ApiError> {
    debug!(experiment_id = %experiment_id, "Admin getting experiment results");

    let report = state.experiment_service.get_results(&experiment_id).await?;

    Ok(Json(report))
}

/// POST /admin/experiments/{id}/start
pub async fn start_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentResponse>, ApiError> {
    debug!(experiment_id = %experiment_id, "Admin starting experiment");

    let experiment = state
        .experiment_service
        .start_experiment(&experiment_id)
        .await?;

    Ok(Json(ExperimentResponse::from(&experiment)))
}

/// POST /admin/experiments/{id}/stop
pub async fn stop_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentResponse>, ApiError> {
    debug!(experiment_id = %experiment_id, "Admin stopping experiment");

    let experiment = state
        .experiment_service
        .stop_experiment(&experiment_id)
        .await?;

    Ok(Json(ExperimentResponse::from(&experiment)))
}

/// POST /admin/experiments/{id}/evaluate
pub async fn evaluate_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<EvaluationResponse>, ApiError> {
    debug!(experiment_id = %experiment_id, "Admin evaluating experiment");

    let result = state.experiment_service.evaluate(&experiment_id).await?;

    Ok(Json(EvaluationResponse {
        experiment_id,
        completed: result.is_some(),
        result,
    }))
}

/// POST /admin/experiments/{id}/assign
pub async fn assign_variant(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let variant_id = state
        .experiment_service
        .select_variant(&experiment_id)
        .await?;

    Ok(Json(AssignmentResponse {
        experiment_id,
        variant_id: variant_id.map(|id| id.to_string()),
    }))
}

/// POST /admin/experiments/{id}/events
pub async fn record_event(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
    Json(request): Json<RecordEventApiRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .experiment_service
        .record_event(&experiment_id, &request.variant_id, request.kind)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
