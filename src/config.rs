//! Tunable thresholds for every stage of the tracking pipeline.
//!
//! All values have sensible defaults and can be partially overridden from
//! JSON (missing keys fall back to the default), which is how the mobile
//! layer ships remote-config tweaks without an app release.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Configuration for the sample evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EvaluatorConfig {
    /// Fixes with a worse self-reported accuracy are rejected for distance and pace.
    /// Default: 20.0 meters
    pub max_accuracy_meters: f64,

    /// Accuracy ceiling for extending the drawn path.
    /// Default: 20.0 meters (same as distance, so the flags agree)
    pub max_path_accuracy_meters: f64,

    /// Speeds above this are treated as positional jumps, not running.
    /// Default: 15.0 m/s (faster than any human sprint)
    pub max_speed_mps: f64,

    /// Speeds below this are treated as stationary drift.
    /// Default: 0.3 m/s (slow walking is ~1.0 m/s)
    pub min_moving_speed_mps: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_accuracy_meters: 20.0,
            max_path_accuracy_meters: 20.0,
            max_speed_mps: 15.0,
            min_moving_speed_mps: 0.3,
        }
    }
}

/// Configuration for the live stats accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct StatsConfig {
    /// Weight of the device-reported speed when fusing with the measured
    /// distance-over-time speed (0.0 = measured only, 1.0 = device only).
    /// Default: 0.6
    pub device_speed_weight: f64,

    /// Exponential smoothing factor for the fused speed (1.0 = no smoothing).
    /// Default: 0.5
    pub smoothing_alpha: f64,

    /// How long the fused speed must stay under the moving floor before the
    /// instant pace is zeroed.
    /// Default: 3000 ms
    pub stationary_decay_ms: i64,

    /// Moving floor used for stationary detection. Should match the evaluator.
    /// Default: 0.3 m/s
    pub min_moving_speed_mps: f64,

    /// Runner body weight used for the calorie estimate.
    /// Default: 70.0 kg
    pub body_weight_kg: f64,

    /// Net running energy cost.
    /// Default: 1.036 kcal per kg per km
    pub kcal_per_kg_km: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            device_speed_weight: 0.6,
            smoothing_alpha: 0.5,
            stationary_decay_ms: 3_000,
            min_moving_speed_mps: 0.3,
            body_weight_kg: 70.0,
            kcal_per_kg_km: 1.036,
        }
    }
}

/// Configuration for run segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SegmentConfig {
    /// Distance at which the in-progress segment is finalized.
    /// Default: 100.0 meters
    pub threshold_meters: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            threshold_meters: 100.0,
        }
    }
}

/// Backoff policy for replaying pending uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RetryPolicy {
    /// Delay after the first failure.
    /// Default: 30 s
    pub initial_delay_ms: u64,

    /// Upper bound for the exponential delay (before jitter).
    /// Default: 1 hour
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the base delay.
    /// Default: 0.2
    pub jitter_ratio: f64,

    /// Failed attempts after which an item stops being retried automatically.
    /// Default: 10
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 30_000,
            max_delay_ms: 3_600_000,
            jitter_ratio: 0.2,
            max_attempts: 10,
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackerConfig {
    pub evaluator: EvaluatorConfig,
    pub stats: StatsConfig,
    pub segments: SegmentConfig,
    pub retry: RetryPolicy,
}

impl TrackerConfig {
    /// Parse a (possibly partial) JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)
            .map_err(|e| TrackerError::config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let ev = &self.evaluator;
        if !(ev.max_accuracy_meters > 0.0) || !(ev.max_path_accuracy_meters > 0.0) {
            return Err(TrackerError::config("accuracy ceilings must be positive"));
        }
        if !(ev.max_speed_mps > 0.0) {
            return Err(TrackerError::config("maxSpeedMps must be positive"));
        }
        if !(ev.min_moving_speed_mps >= 0.0) || ev.min_moving_speed_mps >= ev.max_speed_mps {
            return Err(TrackerError::config(format!(
                "minMovingSpeedMps ({}) must be in [0, maxSpeedMps ({}))",
                ev.min_moving_speed_mps, ev.max_speed_mps
            )));
        }

        let st = &self.stats;
        if !(0.0..=1.0).contains(&st.device_speed_weight) {
            return Err(TrackerError::config("deviceSpeedWeight must be in [0, 1]"));
        }
        if !(st.smoothing_alpha > 0.0 && st.smoothing_alpha <= 1.0) {
            return Err(TrackerError::config("smoothingAlpha must be in (0, 1]"));
        }
        if st.stationary_decay_ms < 0 || !(st.min_moving_speed_mps >= 0.0) {
            return Err(TrackerError::config(
                "stationary detection thresholds must not be negative",
            ));
        }
        if !(st.body_weight_kg > 0.0) || !(st.kcal_per_kg_km >= 0.0) {
            return Err(TrackerError::config("calorie parameters out of range"));
        }

        if !(self.segments.threshold_meters > 0.0) {
            return Err(TrackerError::config("segment thresholdMeters must be positive"));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(TrackerError::config("retry maxAttempts must be at least 1"));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(TrackerError::config(
                "retry initialDelayMs must not exceed maxDelayMs",
            ));
        }
        if !(retry.jitter_ratio >= 0.0) {
            return Err(TrackerError::config("retry jitterRatio must not be negative"));
        }

        Ok(())
    }
}
