//! Weighted traffic assignment
//!
//! Maps a uniform draw in `[0, 100)` onto the experiment's traffic split.
//! Selection never mutates the experiment.

use rand::Rng;

use crate::domain::experiment::{Experiment, Variant};

/// Upper bound (exclusive) of a traffic draw
pub const DRAW_RANGE: f64 = 100.0;

/// Select the variant owning `draw` in the cumulative traffic split.
///
/// Variants are walked in order and the first whose cumulative weight exceeds
/// the draw wins. When rounding leaves the cumulative sum just under the
/// draw, the last variant is returned. Returns `None` unless the experiment
/// is running.
pub fn select_for_draw(experiment: &Experiment, draw: f64) -> Option<&Variant> {
    if !experiment.status().is_running() {
        return None;
    }

    let mut cumulative = 0.0;

    for (variant, weight) in experiment.variants().iter().zip(experiment.traffic_split()) {
        cumulative += weight;

        if cumulative > draw {
            return Some(variant);
        }
    }

    experiment.variants().last()
}

/// Draw uniformly from `[0, 100)` and select the matching variant
pub fn select_variant<'a, R: Rng>(
    experiment: &'a Experiment,
    rng: &mut R,
) -> Option<&'a Variant> {
    if !experiment.status().is_running() {
        return None;
    }

    let draw = rng.gen_range(0.0..DRAW_RANGE);
    select_for_draw(experiment, draw)
}
