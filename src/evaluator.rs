//! # Sample Evaluator
//!
//! Stateless decision function that decides whether a new GPS fix may count
//! toward distance, the drawn path, and pace.
//!
//! ## Filters
//!
//! 1. First sample of a run seeds the path only (no prior fix to measure from)
//! 2. Degraded accuracy rejects the fix
//! 3. Implausible speed (reported or implied by displacement) rejects the fix
//! 4. Sub-moving speed rejects the fix, absorbing stationary drift
//!
//! The three accept flags are modeled independently so that a looser path
//! filter only needs a new predicate, not a new result shape.

use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;
use crate::geo_utils::sample_distance;
use crate::RawSample;

/// Why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum RejectionReason {
    /// Coordinates are NaN or out of range
    InvalidCoordinates,
    /// Timestamp is not after the previous accepted sample
    NonMonotonicTime,
    /// Self-reported accuracy is worse than the configured ceiling
    LowAccuracy,
    /// Speed is implausible for running (positional jump)
    ImplausibleSpeed,
    /// Speed is below the moving floor (stationary drift)
    Stationary,
}

/// Outcome of evaluating one candidate sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EvaluationResult {
    pub accepted_for_distance: bool,
    pub accepted_for_path: bool,
    pub accepted_for_pace: bool,
    /// Distance from the previous accepted sample; 0 unless accepted for distance
    pub distance_meters: f64,
    /// Set when the sample failed a distance/pace filter
    pub rejection: Option<RejectionReason>,
}

impl EvaluationResult {
    fn seed() -> Self {
        Self {
            accepted_for_distance: false,
            accepted_for_path: true,
            accepted_for_pace: false,
            distance_meters: 0.0,
            rejection: None,
        }
    }

    fn rejected(reason: RejectionReason) -> Self {
        Self {
            accepted_for_distance: false,
            accepted_for_path: false,
            accepted_for_pace: false,
            distance_meters: 0.0,
            rejection: Some(reason),
        }
    }

    /// True when none of the three flags is set.
    pub fn is_rejected(&self) -> bool {
        !self.accepted_for_distance && !self.accepted_for_path && !self.accepted_for_pace
    }
}

/// Evaluate a candidate fix against the previous accepted one.
///
/// Pure and deterministic: the same inputs always give the same result.
///
/// # Example
/// ```
/// use run_tracker::{evaluate, EvaluatorConfig, RawSample};
///
/// let config = EvaluatorConfig::default();
/// let a = RawSample::new(51.5000, -0.1, 0).with_speed(3.0).with_accuracy(5.0);
/// let b = RawSample::new(51.50003, -0.1, 1000).with_speed(3.0).with_accuracy(5.0);
///
/// assert!(evaluate(None, &a, &config).accepted_for_path);
/// let result = evaluate(Some(&a), &b, &config);
/// assert!(result.accepted_for_distance);
/// assert!(result.distance_meters > 3.0);
/// ```
pub fn evaluate(
    previous_accepted: Option<&RawSample>,
    candidate: &RawSample,
    config: &EvaluatorConfig,
) -> EvaluationResult {
    if !candidate.is_valid() {
        return EvaluationResult::rejected(RejectionReason::InvalidCoordinates);
    }

    let previous = match previous_accepted {
        Some(previous) => previous,
        None => return EvaluationResult::seed(),
    };

    let elapsed_ms = candidate.timestamp_ms - previous.timestamp_ms;
    if elapsed_ms <= 0 {
        return EvaluationResult::rejected(RejectionReason::NonMonotonicTime);
    }

    let distance = sample_distance(previous, candidate);
    let implied_speed = distance / (elapsed_ms as f64 / 1000.0);

    // Accuracy gates distance/pace and path separately
    let path_ok = candidate.accuracy_meters <= config.max_path_accuracy_meters;
    if candidate.accuracy_meters > config.max_accuracy_meters {
        let mut result = EvaluationResult::rejected(RejectionReason::LowAccuracy);
        result.accepted_for_path = path_ok && passes_speed(candidate, implied_speed, config);
        return result;
    }

    if (candidate.has_speed() && candidate.speed_mps > config.max_speed_mps)
        || implied_speed > config.max_speed_mps
    {
        return EvaluationResult::rejected(RejectionReason::ImplausibleSpeed);
    }

    if effective_speed(candidate, implied_speed) < config.min_moving_speed_mps {
        return EvaluationResult::rejected(RejectionReason::Stationary);
    }

    EvaluationResult {
        accepted_for_distance: true,
        accepted_for_path: path_ok,
        accepted_for_pace: true,
        distance_meters: distance,
        rejection: None,
    }
}

/// Reported speed when available, otherwise the displacement-implied speed.
fn effective_speed(candidate: &RawSample, implied_speed: f64) -> f64 {
    if candidate.has_speed() {
        candidate.speed_mps
    } else {
        implied_speed
    }
}

fn passes_speed(candidate: &RawSample, implied_speed: f64, config: &EvaluatorConfig) -> bool {
    let speed = effective_speed(candidate, implied_speed);
    implied_speed <= config.max_speed_mps
        && speed <= config.max_speed_mps
        && speed >= config.min_moving_speed_mps
}
