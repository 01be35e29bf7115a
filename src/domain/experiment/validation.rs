//! Experiment validation utilities

use thiserror::Error;

/// Maximum length for experiment IDs
pub const MAX_EXPERIMENT_ID_LENGTH: usize = 50;

/// Maximum length for variant IDs
pub const MAX_VARIANT_ID_LENGTH: usize = 50;

/// Allowed deviation of a traffic split sum from 100
pub const TRAFFIC_SPLIT_TOLERANCE: f64 = 0.01;

/// Validation errors for experiments and variants
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("Experiment ID cannot be empty")]
    EmptyId,

    #[error("Experiment ID exceeds maximum length of {0} characters")]
    IdTooLong(usize),

    #[error("Experiment ID must start and end with a letter or number")]
    InvalidIdBoundary,

    #[error("Experiment ID contains invalid character: '{0}'")]
    InvalidIdCharacter(char),

    #[error("Experiment ID cannot contain consecutive hyphens")]
    ConsecutiveHyphens,

    #[error("Variant ID cannot be empty")]
    EmptyVariantId,

    #[error("Variant ID exceeds maximum length of {0} characters")]
    VariantIdTooLong(usize),

    #[error("Variant ID must start and end with a letter or number")]
    InvalidVariantIdBoundary,

    #[error("Variant ID contains invalid character: '{0}'")]
    InvalidVariantIdCharacter(char),

    #[error("Variant ID cannot contain consecutive hyphens")]
    VariantIdConsecutiveHyphens,

    #[error("Experiment name cannot be empty")]
    EmptyName,

    #[error("Content ID cannot be empty")]
    EmptyContentId,

    #[error("Experiment must have at least 2 variants")]
    InsufficientVariants,

    #[error("Duplicate variant ID: '{0}'")]
    DuplicateVariantId(String),

    #[error("Traffic split has {actual} weights but the experiment has {expected} variants")]
    TrafficSplitLengthMismatch { expected: usize, actual: usize },

    #[error("Traffic weight must be a finite, non-negative percentage, got {0}")]
    InvalidTrafficWeight(f64),

    #[error("Traffic split must sum to 100, got {0}")]
    InvalidTrafficSum(f64),

    #[error("Significance level must be within (0, 1], got {0}")]
    InvalidSignificanceLevel(f64),

    #[error("Invalid experiment status transition from {0} to {1}")]
    InvalidStatusTransition(String, String),
}

/// Shape violations shared by experiment and variant identifiers
enum IdentifierViolation {
    Empty,
    TooLong,
    Boundary,
    Character(char),
    ConsecutiveHyphens,
}

fn check_identifier(id: &str, max_len: usize) -> Result<(), IdentifierViolation> {
    let (Some(first), Some(last)) = (id.chars().next(), id.chars().last()) else {
        return Err(IdentifierViolation::Empty);
    };

    if id.len() > max_len {
        return Err(IdentifierViolation::TooLong);
    }

    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(IdentifierViolation::Boundary);
    }

    let mut prev_was_hyphen = false;

    for ch in id.chars() {
        if ch == '-' {
            if prev_was_hyphen {
                return Err(IdentifierViolation::ConsecutiveHyphens);
            }
            prev_was_hyphen = true;
        } else if ch.is_ascii_alphanumeric() {
            prev_was_hyphen = false;
        } else {
            return Err(IdentifierViolation::Character(ch));
        }
    }

    Ok(())
}

/// Validate an experiment ID
pub fn validate_experiment_id(id: &str) -> Result<(), ExperimentValidationError> {
    check_identifier(id, MAX_EXPERIMENT_ID_LENGTH).map_err(|violation| match violation {
        IdentifierViolation::Empty => ExperimentValidationError::EmptyId,
        IdentifierViolation::TooLong => {
            ExperimentValidationError::IdTooLong(MAX_EXPERIMENT_ID_LENGTH)
        }
        IdentifierViolation::Boundary => ExperimentValidationError::InvalidIdBoundary,
        IdentifierViolation::Character(ch) => ExperimentValidationError::InvalidIdCharacter(ch),
        IdentifierViolation::ConsecutiveHyphens => ExperimentValidationError::ConsecutiveHyphens,
    })
}

/// Validate a variant ID
pub fn validate_variant_id(id: &str) -> Result<(), ExperimentValidationError> {
    check_identifier(id, MAX_VARIANT_ID_LENGTH).map_err(|violation| match violation {
        IdentifierViolation::Empty => ExperimentValidationError::EmptyVariantId,
        IdentifierViolation::TooLong => {
            ExperimentValidationError::VariantIdTooLong(MAX_VARIANT_ID_LENGTH)
        }
        IdentifierViolation::Boundary => ExperimentValidationError::InvalidVariantIdBoundary,
        IdentifierViolation::Character(ch) => {
            ExperimentValidationError::InvalidVariantIdCharacter(ch)
        }
        IdentifierViolation::ConsecutiveHyphens => {
            ExperimentValidationError::VariantIdConsecutiveHyphens
        }
    })
}

/// Validate a traffic split against the number of variants it routes to
pub fn validate_traffic_split(
    split: &[f64],
    variant_count: usize,
) -> Result<(), ExperimentValidationError> {
    if split.len() != variant_count {
        return Err(ExperimentValidationError::TrafficSplitLengthMismatch {
            expected: variant_count,
            actual: split.len(),
        });
    }

    if let Some(weight) = split.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(ExperimentValidationError::InvalidTrafficWeight(*weight));
    }

    let sum: f64 = split.iter().sum();

    if (sum - 100.0).abs() > TRAFFIC_SPLIT_TOLERANCE {
        return Err(ExperimentValidationError::InvalidTrafficSum(sum));
    }

    Ok(())
}

/// Validate the confidence an experiment requires before declaring a winner
pub fn validate_significance_level(level: f64) -> Result<(), ExperimentValidationError> {
    if level.is_finite() && level > 0.0 && level <= 1.0 {
        Ok(())
    } else {
        Err(ExperimentValidationError::InvalidSignificanceLevel(level))
    }
}

/// Build an equal traffic split across `variant_count` variants
pub fn equal_split(variant_count: usize) -> Vec<f64> {
    if variant_count == 0 {
        return Vec::new();
    }

    vec![100.0 / variant_count as f64; variant_count]
}
