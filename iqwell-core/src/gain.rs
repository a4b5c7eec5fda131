//! Multi-stage gain distribution.
//!
//! ## Algorithm
//!
//! Tuners expose several coarse, independently quantized gain elements, but
//! callers want to set one aggregate figure. `allocate` splits a target
//! value across the stages with a single backward coordinate pass:
//!
//! 1. Start every stage at its minimum.
//! 2. Walk stages from last to first. For each stage, scan its quantized
//!    candidates (min to max by step) holding the others fixed, and keep the
//!    candidate whose full-sum error against the target is smallest.
//! 3. Return the per-stage values; residual error is accepted silently.
//!
//! The pass is deterministic and order-dependent. It is not globally
//! optimal, and downstream calibration may depend on its exact outputs, so
//! the backward order and first-best tie handling must not change.

use serde::{Deserialize, Serialize};

/// One independently settable, quantized hardware gain element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainStage {
    /// Lowest settable value in dB.
    pub min_db: f64,
    /// Highest settable value in dB.
    pub max_db: f64,
    /// Increment between settable values in dB.
    pub step_db: f64,
}

impl GainStage {
    pub fn new(min_db: f64, max_db: f64, step_db: f64) -> Self {
        Self {
            min_db,
            max_db,
            step_db,
        }
    }
}

/// Distribute `target_db` across `stages`, one chosen value per stage.
///
/// Every returned value is a quantized point within its stage's range. The
/// sum approximates `target_db`; callers that need the realized figure
/// should sum the result rather than trust the request.
pub fn allocate(target_db: f64, stages: &[GainStage]) -> Vec<f64> {
    let mut gains: Vec<f64> = stages.iter().map(|s| s.min_db).collect();

    for i in (0..stages.len()).rev() {
        let stage = stages[i];
        let mut best = stage.min_db;
        let mut best_err = f64::INFINITY;

        let mut candidate = stage.min_db;
        while candidate <= stage.max_db {
            gains[i] = candidate;
            let err = (target_db - gains.iter().sum::<f64>()).abs();
            // Strict improvement: on ties the lowest candidate wins.
            if err < best_err {
                best_err = err;
                best = candidate;
            }
            if stage.step_db <= 0.0 {
                break;
            }
            candidate += stage.step_db;
        }

        gains[i] = best;
    }

    gains
}

/// Sum of stage minimums and maximums: the reachable aggregate span.
pub fn aggregate_range(stages: &[GainStage]) -> (f64, f64) {
    let min: f64 = stages.iter().map(|s| s.min_db).sum();
    let max: f64 = stages.iter().map(|s| s.max_db).sum();
    (min, max)
}
