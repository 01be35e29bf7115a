//! Evaluation outcomes and read-only experiment reports

use serde::{Deserialize, Serialize};

use super::entity::{Experiment, ExperimentStatus, VariantId, VariantSnapshot};
use super::metrics::{PrimaryMetric, VariantCounters, VariantRates};

// ============================================================================
// EvaluationResult
// ============================================================================

/// Verdict produced when a variant significantly outperforms the runner-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// ID of the experiment that completed
    pub test_id: String,
    /// Display name of the winning variant
    pub winner: String,
    /// ID of the winning variant
    pub winner_variant_id: VariantId,
    /// Relative improvement of the winner over the runner-up (percentage)
    pub improvement: f64,
    /// Discrete confidence level derived from the z-score
    pub confidence: f64,
    /// Two-proportion z-score of leader vs runner-up
    pub z_score: f64,
    /// Metric the variants were ranked by
    pub primary_metric: PrimaryMetric,
    /// Human-readable action for the publishing collaborator
    pub recommendation: String,
}

impl EvaluationResult {
    /// Build the recommendation text for a winning variant
    pub fn recommendation_for(
        winner: &str,
        improvement: f64,
        confidence: f64,
        metric: PrimaryMetric,
    ) -> String {
        format!(
            "Apply variant '{}': {:.1}% higher {} than the runner-up at {:.0}% confidence",
            winner,
            improvement,
            metric.label(),
            confidence * 100.0
        )
    }
}

// ============================================================================
// ExperimentReport
// ============================================================================

/// Per-variant figures in a report
#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    pub variant_id: String,
    pub variant_name: String,
    pub traffic_weight: f64,
    pub counters: VariantCounters,
    pub rates: VariantRates,
    /// Value of the primary metric used for ranking
    pub metric_value: f64,
}

/// Current standing of leader vs runner-up, without any state change
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeaderboardAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_variant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_up_variant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Confidence bucket of the current z-score (0 when not significant)
    pub confidence: f64,
}

/// Read-only report for an experiment
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub experiment_name: String,
    pub content_id: String,
    pub status: ExperimentStatus,
    pub primary_metric: PrimaryMetric,
    pub current_sample_size: u64,
    pub minimum_sample_size: u64,
    /// Fraction of the sample-size threshold reached, capped at 1.0
    pub sample_progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
    pub variants: Vec<VariantReport>,
    pub analysis: LeaderboardAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_variant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ExperimentReport {
    /// Assemble a report from an experiment and its current analysis
    pub fn new(experiment: &Experiment, analysis: LeaderboardAnalysis) -> Self {
        let metric = experiment.primary_metric();
        let variants = experiment
            .snapshot()
            .into_iter()
            .zip(experiment.traffic_split().iter().copied())
            .map(|(snapshot, weight)| VariantReport::new(snapshot, weight, metric))
            .collect();

        let current = experiment.current_sample_size();
        let minimum = experiment.minimum_sample_size();
        let sample_progress = if minimum == 0 {
            1.0
        } else {
            (current as f64 / minimum as f64).min(1.0)
        };

        let duration_hours = experiment.start_date().map(|started| {
            let end = experiment.end_date().unwrap_or_else(chrono::Utc::now);
            (end - started).num_seconds() as f64 / 3600.0
        });

        Self {
            experiment_id: experiment.id().to_string(),
            experiment_name: experiment.name().to_string(),
            content_id: experiment.content_id().to_string(),
            status: experiment.status(),
            primary_metric: metric,
            current_sample_size: current,
            minimum_sample_size: minimum,
            sample_progress,
            duration_hours,
            variants,
            analysis,
            winner_variant_id: experiment.winner().map(|w| w.to_string()),
            recommendation: experiment.outcome().map(|o| o.recommendation.clone()),
        }
    }
}

impl VariantReport {
    fn new(snapshot: VariantSnapshot, traffic_weight: f64, metric: PrimaryMetric) -> Self {
        Self {
            metric_value: snapshot.metric_value(metric),
            variant_id: snapshot.id.to_string(),
            variant_name: snapshot.name,
            traffic_weight,
            counters: snapshot.counters,
            rates: snapshot.rates,
        }
    }
}
