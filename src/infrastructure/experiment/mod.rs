//! Infrastructure layer for content split testing
//!
//! Provides the in-memory experiment store, weighted traffic assignment and
//! the significance evaluator.

mod in_memory_repository;
mod selector;
mod statistical;

pub use in_memory_repository::InMemoryExperimentRepository;
pub use selector::{select_for_draw, select_variant, DRAW_RANGE};
pub use statistical::{
    compare_leaders, confidence_for_z, evaluate_experiment, two_proportion_z_test,
    LeaderComparison, DEFAULT_MIN_ARM_IMPRESSIONS,
};
