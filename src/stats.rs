//! # Stats Accumulator
//!
//! Folds accepted distance/time ticks into the live numbers shown while
//! running.
//!
//! - **Average pace/speed** come purely from cumulative distance and elapsed
//!   time, so the headline number changes slowly.
//! - **Instant pace** is a short-horizon estimate that fuses the measured
//!   distance-over-time speed with the device-reported speed, then smooths it.
//! - **Stationary decay** zeroes the instant pace once the runner has been
//!   still for a sustained window, instead of freezing the last value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StatsConfig;

/// A pace expressed as seconds per kilometer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Pace {
    pub minutes: u32,
    pub seconds: u32,
    /// Whole seconds per kilometer
    pub total_seconds: u32,
}

impl Pace {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a pace from seconds per kilometer. Non-finite or negative input gives zero.
    pub fn from_seconds_per_km(seconds_per_km: f64) -> Self {
        if !seconds_per_km.is_finite() || seconds_per_km <= 0.0 {
            return Self::zero();
        }
        let total_seconds = seconds_per_km.round().min(u32::MAX as f64) as u32;
        Self {
            minutes: total_seconds / 60,
            seconds: total_seconds % 60,
            total_seconds,
        }
    }

    /// Build a pace from a speed in m/s. Zero or negative speed gives zero.
    pub fn from_speed_mps(speed_mps: f64) -> Self {
        if speed_mps <= 0.0 {
            return Self::zero();
        }
        Self::from_seconds_per_km(1000.0 / speed_mps)
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds == 0
    }
}

impl fmt::Display for Pace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{:02}\"", self.minutes, self.seconds)
    }
}

/// Live statistics for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RunningStats {
    /// Heart rate; `None` until the first reading arrives
    pub bpm: Option<u32>,
    /// Steps per minute; `None` until the first reading arrives
    pub cadence: Option<u32>,
    /// Run-average pace
    pub pace: Pace,
    /// Short-horizon fused pace, zeroed while stationary
    pub instant_pace: Pace,
    /// Run-average speed in km/h
    pub speed: f64,
    /// Estimated energy in kcal
    pub calories: f64,
}

/// Input for the instant pace estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FusionSample {
    pub timestamp_ms: i64,
    /// Device-reported speed; negative when unknown
    pub speed_mps: f64,
    pub accuracy_meters: f64,
    /// Accepted distance since the previous fusion sample
    pub distance_delta_meters: f64,
}

/// Stateful accumulator of live statistics for one run.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    config: StatsConfig,
    stats: RunningStats,
    elapsed_seconds: f64,

    /// Timestamp of the previous fusion sample
    last_fusion_ms: Option<i64>,
    /// Exponentially smoothed fused speed
    smoothed_speed: Option<f64>,
    /// Start of the current run of below-floor fused speeds
    stationary_since_ms: Option<i64>,
}

impl StatsAccumulator {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            stats: RunningStats::default(),
            elapsed_seconds: 0.0,
            last_fusion_ms: None,
            smoothed_speed: None,
            stationary_since_ms: None,
        }
    }

    /// Fold the latest totals (and optionally a fusion tick) into the stats.
    ///
    /// `bpm`/`cadence` of `None` keep the previous reading.
    pub fn update_stats(
        &mut self,
        cumulative_distance_meters: f64,
        elapsed_seconds: f64,
        bpm: Option<u32>,
        cadence: Option<u32>,
        fusion: Option<FusionSample>,
    ) -> RunningStats {
        self.elapsed_seconds = elapsed_seconds.max(0.0);
        let km = cumulative_distance_meters.max(0.0) / 1000.0;

        if km > 0.0 && self.elapsed_seconds > 0.0 {
            self.stats.pace = Pace::from_seconds_per_km(self.elapsed_seconds / km);
            self.stats.speed = km / (self.elapsed_seconds / 3600.0);
        } else {
            self.stats.pace = Pace::zero();
            self.stats.speed = 0.0;
        }

        self.stats.calories = self.config.body_weight_kg * km * self.config.kcal_per_kg_km;

        if bpm.is_some() {
            self.stats.bpm = bpm;
        }
        if cadence.is_some() {
            self.stats.cadence = cadence;
        }

        if let Some(sample) = fusion {
            self.apply_fusion(&sample);
        }

        self.stats.clone()
    }

    fn apply_fusion(&mut self, sample: &FusionSample) {
        let measured = match self.last_fusion_ms {
            Some(last) if sample.timestamp_ms > last => {
                let dt = (sample.timestamp_ms - last) as f64 / 1000.0;
                Some(sample.distance_delta_meters.max(0.0) / dt)
            }
            _ => None,
        };
        if self.last_fusion_ms.map_or(true, |last| sample.timestamp_ms > last) {
            self.last_fusion_ms = Some(sample.timestamp_ms);
        }

        let device = (sample.speed_mps.is_finite() && sample.speed_mps >= 0.0)
            .then_some(sample.speed_mps);

        let fused = match (measured, device) {
            (Some(m), Some(d)) => {
                let w = self.config.device_speed_weight;
                w * d + (1.0 - w) * m
            }
            (Some(m), None) => m,
            (None, Some(d)) => d,
            (None, None) => return,
        };

        if fused < self.config.min_moving_speed_mps {
            let since = *self.stationary_since_ms.get_or_insert(sample.timestamp_ms);
            if sample.timestamp_ms - since >= self.config.stationary_decay_ms {
                self.stats.instant_pace = Pace::zero();
                self.smoothed_speed = None;
            }
            // Inside the window the last displayed pace is held
            return;
        }

        self.stationary_since_ms = None;
        let alpha = self.config.smoothing_alpha;
        let smoothed = match self.smoothed_speed {
            Some(prev) => alpha * fused + (1.0 - alpha) * prev,
            None => fused,
        };
        self.smoothed_speed = Some(smoothed);
        self.stats.instant_pace = Pace::from_speed_mps(smoothed);
    }

    /// Override elapsed time (e.g. from the UI timer while paused).
    pub fn set_elapsed_time(&mut self, seconds: f64) {
        self.elapsed_seconds = seconds.max(0.0);
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Zero every field. Heart rate and cadence become "no reading".
    pub fn reset_stats(&mut self) {
        self.stats = RunningStats::default();
        self.elapsed_seconds = 0.0;
        self.last_fusion_ms = None;
        self.smoothed_speed = None;
        self.stationary_since_ms = None;
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}
