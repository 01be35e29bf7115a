//! Experiment domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

use super::metrics::{metric_value, EventKind, PrimaryMetric, VariantCounters, VariantRates};
use super::result::EvaluationResult;
use super::validation::{
    validate_experiment_id, validate_significance_level, validate_traffic_split,
    validate_variant_id, ExperimentValidationError,
};

/// Default threshold on total impressions before significance is checked
pub const DEFAULT_MINIMUM_SAMPLE_SIZE: u64 = 1000;

/// Default confidence required to declare a winner
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.95;

// ============================================================================
// ExperimentId
// ============================================================================

/// Unique identifier for an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Create a new experiment ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
        let id = id.into();
        validate_experiment_id(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh, random experiment ID
    pub fn generate() -> Self {
        Self(format!("exp-{}", Uuid::new_v4()))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = ExperimentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// VariantId
// ============================================================================

/// Identifier of a variant, unique within its experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantId(String);

impl VariantId {
    /// Create a new variant ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
        let id = id.into();
        validate_variant_id(&id)?;
        Ok(Self(id))
    }

    /// Positional ID used when a definition does not carry one (1-based)
    pub fn positional(index: usize) -> Self {
        Self(format!("variant-{}", index + 1))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VariantId {
    type Error = ExperimentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VariantId> for String {
    fn from(id: VariantId) -> Self {
        id.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VariantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ExperimentStatus
// ============================================================================

/// Status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Experiment is being configured, not yet routing traffic
    #[default]
    Draft,
    /// Experiment is routing traffic and accepting events
    Running,
    /// Experiment was stopped; there is no way back to running
    Paused,
    /// A winner was declared
    Completed,
}

impl ExperimentStatus {
    /// Check if the experiment is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the experiment reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        matches!(
            (self, target),
            (Self::Draft, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running, Self::Completed)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// ============================================================================
// VariantDefinition
// ============================================================================

/// Variant as described by the content collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantDefinition {
    /// Optional explicit ID; a positional ID is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque attributes that differ from the control (title, thumbnail, cta, ...)
    #[serde(default)]
    pub changes: BTreeMap<String, String>,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_change(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Variant
// ============================================================================

/// One arm of an experiment, with its counters and derived rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    changes: BTreeMap<String, String>,
    #[serde(default)]
    counters: VariantCounters,
    #[serde(default)]
    rates: VariantRates,
}

impl Variant {
    /// Create a new variant with zeroed counters
    pub fn new(id: VariantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            changes: BTreeMap::new(),
            counters: VariantCounters::default(),
            rates: VariantRates::default(),
        }
    }

    /// Build a variant from a collaborator definition at position `index`
    pub fn from_definition(
        definition: VariantDefinition,
        index: usize,
    ) -> Result<Self, ExperimentValidationError> {
        let id = match definition.id {
            Some(id) => VariantId::new(id)?,
            None => VariantId::positional(index),
        };

        let mut variant = Self::new(id, definition.name);
        variant.description = definition.description;
        variant.changes = definition.changes;
        Ok(variant)
    }

    pub fn with_change(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &VariantId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn changes(&self) -> &BTreeMap<String, String> {
        &self.changes
    }

    pub fn counters(&self) -> &VariantCounters {
        &self.counters
    }

    pub fn rates(&self) -> &VariantRates {
        &self.rates
    }

    /// Comparison value for the given primary metric
    pub fn metric_value(&self, metric: PrimaryMetric) -> f64 {
        metric_value(&self.counters, &self.rates, metric)
    }

    fn apply(&mut self, kind: EventKind) {
        self.counters.increment(kind);
        self.rates = VariantRates::from_counters(&self.counters);
    }
}

/// Immutable copy of a variant's counters and rates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantSnapshot {
    pub id: VariantId,
    pub name: String,
    pub counters: VariantCounters,
    pub rates: VariantRates,
}

impl VariantSnapshot {
    pub fn metric_value(&self, metric: PrimaryMetric) -> f64 {
        metric_value(&self.counters, &self.rates, metric)
    }
}

impl From<&Variant> for VariantSnapshot {
    fn from(variant: &Variant) -> Self {
        Self {
            id: variant.id.clone(),
            name: variant.name.clone(),
            counters: variant.counters,
            rates: variant.rates,
        }
    }
}

// ============================================================================
// Experiment
// ============================================================================

/// A split test comparing two or more content variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    id: ExperimentId,
    name: String,
    content_id: String,
    status: ExperimentStatus,
    variants: Vec<Variant>,
    traffic_split: Vec<f64>,
    primary_metric: PrimaryMetric,
    minimum_sample_size: u64,
    significance_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner: Option<VariantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<EvaluationResult>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a new experiment in Draft status
    pub fn new(
        id: ExperimentId,
        name: impl Into<String>,
        content_id: impl Into<String>,
        primary_metric: PrimaryMetric,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            content_id: content_id.into(),
            status: ExperimentStatus::Draft,
            variants: Vec::new(),
            traffic_split: Vec::new(),
            primary_metric,
            minimum_sample_size: DEFAULT_MINIMUM_SAMPLE_SIZE,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            start_date: None,
            end_date: None,
            winner: None,
            confidence: None,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    // Builder methods

    /// Append a variant; its weight is supplied through the traffic split
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Set the per-variant traffic weights, aligned with variant order
    pub fn with_traffic_split(mut self, split: Vec<f64>) -> Self {
        self.traffic_split = split;
        self
    }

    pub fn with_minimum_sample_size(mut self, minimum_sample_size: u64) -> Self {
        self.minimum_sample_size = minimum_sample_size;
        self
    }

    pub fn with_significance_level(mut self, significance_level: f64) -> Self {
        self.significance_level = significance_level;
        self
    }

    /// Check the structural invariants required before the experiment is stored
    pub fn validate(&self) -> Result<(), ExperimentValidationError> {
        if self.name.trim().is_empty() {
            return Err(ExperimentValidationError::EmptyName);
        }

        if self.content_id.trim().is_empty() {
            return Err(ExperimentValidationError::EmptyContentId);
        }

        if self.variants.len() < 2 {
            return Err(ExperimentValidationError::InsufficientVariants);
        }

        let mut seen = HashSet::new();

        for variant in &self.variants {
            if !seen.insert(variant.id.as_str()) {
                return Err(ExperimentValidationError::DuplicateVariantId(
                    variant.id.to_string(),
                ));
            }
        }

        validate_traffic_split(&self.traffic_split, self.variants.len())?;
        validate_significance_level(self.significance_level)
    }

    // Getters

    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, id: &VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| &v.id == id)
    }

    pub fn traffic_split(&self) -> &[f64] {
        &self.traffic_split
    }

    pub fn primary_metric(&self) -> PrimaryMetric {
        self.primary_metric
    }

    pub fn minimum_sample_size(&self) -> u64 {
        self.minimum_sample_size
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    /// Total impressions across all variants, recomputed on every call
    pub fn current_sample_size(&self) -> u64 {
        self.variants
            .iter()
            .map(|v| v.counters.impressions)
            .fold(0u64, u64::saturating_add)
    }

    /// Whether enough impressions were collected to attempt a significance check
    pub fn sample_threshold_met(&self) -> bool {
        self.current_sample_size() >= self.minimum_sample_size
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn winner(&self) -> Option<&VariantId> {
        self.winner.as_ref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn outcome(&self) -> Option<&EvaluationResult> {
        self.outcome.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // Variant registry

    /// Record one event against a variant.
    ///
    /// Returns `false` and leaves the experiment untouched when the variant
    /// is unknown or the experiment is not running.
    pub fn apply_event(&mut self, variant_id: &VariantId, kind: EventKind) -> bool {
        if !self.status.is_running() {
            return false;
        }

        let Some(variant) = self.variants.iter_mut().find(|v| &v.id == variant_id) else {
            return false;
        };

        variant.apply(kind);
        self.touch();
        true
    }

    /// Immutable copies of every variant's counters and rates
    pub fn snapshot(&self) -> Vec<VariantSnapshot> {
        self.variants.iter().map(VariantSnapshot::from).collect()
    }

    // Status transitions

    /// Start the experiment (Draft -> Running)
    pub fn start(&mut self) -> Result<(), ExperimentValidationError> {
        self.transition_to(ExperimentStatus::Running)?;
        self.start_date = Some(Utc::now());
        Ok(())
    }

    /// Stop the experiment (Running -> Paused)
    pub fn stop(&mut self) -> Result<(), ExperimentValidationError> {
        self.transition_to(ExperimentStatus::Paused)
    }

    /// Declare the winner carried by `result` (Running -> Completed)
    pub fn complete(&mut self, result: EvaluationResult) -> Result<(), ExperimentValidationError> {
        self.transition_to(ExperimentStatus::Completed)?;
        self.winner = Some(result.winner_variant_id.clone());
        self.confidence = Some(result.confidence);
        self.end_date = Some(Utc::now());
        self.outcome = Some(result);
        Ok(())
    }

    // Private helpers

    fn transition_to(&mut self, target: ExperimentStatus) -> Result<(), ExperimentValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                target.to_string(),
            ));
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
