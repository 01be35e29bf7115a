//! Statistical analysis functions for split testing
//!
//! Ranks variants by the experiment's primary metric and compares the top two
//! with a pooled two-proportion z-test. Only leader vs runner-up is tested;
//! with more than two variants the remaining arms do not take part and no
//! multiple-comparison correction is applied.

use std::cmp::Ordering;

use crate::domain::experiment::{
    EvaluationResult, Experiment, LeaderboardAnalysis, PrimaryMetric, VariantSnapshot,
};

/// Default minimum impressions each compared arm needs before testing
pub const DEFAULT_MIN_ARM_IMPRESSIONS: u64 = 100;

/// z-score thresholds and the confidence they map to, strongest first
const CONFIDENCE_BUCKETS: [(f64, f64); 4] =
    [(2.576, 0.99), (1.96, 0.95), (1.645, 0.90), (1.28, 0.80)];

/// Map a z-score to a discrete confidence level (0 when not significant)
pub fn confidence_for_z(z: f64) -> f64 {
    CONFIDENCE_BUCKETS
        .iter()
        .find(|(threshold, _)| z >= *threshold)
        .map(|(_, confidence)| *confidence)
        .unwrap_or(0.0)
}

/// Pooled two-proportion z-test
///
/// # Arguments
/// * `p1`, `p2` - Observed proportions in `[0, 1]`
/// * `n1`, `n2` - Sample sizes behind each proportion
///
/// # Returns
/// * `Some(|z|)` if the standard error is positive and finite
/// * `None` otherwise
pub fn two_proportion_z_test(p1: f64, n1: u64, p2: f64, n2: u64) -> Option<f64> {
    if n1 == 0 || n2 == 0 {
        return None;
    }

    let n1 = n1 as f64;
    let n2 = n2 as f64;

    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();

    if !se.is_finite() || se <= 0.0 {
        return None;
    }

    let z = (p1 - p2).abs() / se;
    z.is_finite().then_some(z)
}

/// Leader vs runner-up comparison for one round of evaluation
#[derive(Debug, Clone)]
pub struct LeaderComparison {
    pub leader: VariantSnapshot,
    pub runner_up: VariantSnapshot,
    pub leader_value: f64,
    pub runner_up_value: f64,
    /// Relative improvement (percentage); `None` when the runner-up value is 0
    pub improvement: Option<f64>,
    /// `None` when an arm is below the impression floor or the test is degenerate
    pub z_score: Option<f64>,
    pub confidence: f64,
}

impl LeaderComparison {
    pub fn analysis(&self) -> LeaderboardAnalysis {
        LeaderboardAnalysis {
            leader_variant_id: Some(self.leader.id.to_string()),
            runner_up_variant_id: Some(self.runner_up.id.to_string()),
            improvement: self.improvement,
            z_score: self.z_score,
            confidence: self.confidence,
        }
    }
}

/// Rank the snapshots by `metric` and compare the top two.
///
/// Returns `None` with fewer than two variants.
pub fn compare_leaders(
    snapshots: Vec<VariantSnapshot>,
    metric: PrimaryMetric,
    min_arm_impressions: u64,
) -> Option<LeaderComparison> {
    let mut ranked: Vec<(f64, VariantSnapshot)> = snapshots
        .into_iter()
        .map(|snapshot| (snapshot.metric_value(metric), snapshot))
        .collect();

    // Stable: ties keep declaration order
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut ranked = ranked.into_iter();
    let (leader_value, leader) = ranked.next()?;
    let (runner_up_value, runner_up) = ranked.next()?;

    let improvement = (runner_up_value != 0.0)
        .then(|| (leader_value - runner_up_value) / runner_up_value * 100.0);

    let floor_met = leader.counters.impressions >= min_arm_impressions
        && runner_up.counters.impressions >= min_arm_impressions;

    let z_score = if floor_met {
        two_proportion_z_test(
            leader_value / 100.0,
            leader.counters.impressions,
            runner_up_value / 100.0,
            runner_up.counters.impressions,
        )
    } else {
        None
    };

    Some(LeaderComparison {
        leader,
        runner_up,
        leader_value,
        runner_up_value,
        improvement,
        z_score,
        confidence: z_score.map(confidence_for_z).unwrap_or(0.0),
    })
}

/// Decide whether the experiment has a significant winner.
///
/// Abstains (returns `None`) when the runner-up value is 0, when either arm
/// has fewer than `min_arm_impressions` impressions, or when the confidence
/// stays below the experiment's significance level. This never changes the
/// experiment; the caller applies the verdict.
pub fn evaluate_experiment(
    experiment: &Experiment,
    min_arm_impressions: u64,
) -> Option<EvaluationResult> {
    let metric = experiment.primary_metric();
    let comparison = compare_leaders(experiment.snapshot(), metric, min_arm_impressions)?;

    let improvement = comparison.improvement?;
    let z_score = comparison.z_score?;
    let confidence = comparison.confidence;

    if confidence <= 0.0 || confidence < experiment.significance_level() {
        return None;
    }

    let winner = comparison.leader;

    Some(EvaluationResult {
        test_id: experiment.id().to_string(),
        recommendation: EvaluationResult::recommendation_for(
            &winner.name,
            improvement,
            confidence,
            metric,
        ),
        winner: winner.name,
        winner_variant_id: winner.id,
        improvement,
        confidence,
        z_score,
        primary_metric: metric,
    })
}
