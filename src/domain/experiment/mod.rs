//! Experiment domain module for content split testing
//!
//! Types for experiments, their variants and engagement counters, the
//! verdicts produced by significance testing, and the store abstraction
//! experiments are kept in.

mod entity;
mod metrics;
mod repository;
mod result;
mod validation;

// Re-export all public types
pub use entity::{
    Experiment, ExperimentId, ExperimentStatus, Variant, VariantDefinition, VariantId,
    VariantSnapshot, DEFAULT_MINIMUM_SAMPLE_SIZE, DEFAULT_SIGNIFICANCE_LEVEL,
};
pub use metrics::{metric_value, EventKind, PrimaryMetric, VariantCounters, VariantRates};
pub use repository::{ExperimentQuery, ExperimentRepository};
pub use result::{EvaluationResult, ExperimentReport, LeaderboardAnalysis, VariantReport};
pub use validation::{equal_split, ExperimentValidationError, TRAFFIC_SPLIT_TOLERANCE};
