//! # Run Session
//!
//! Owns every piece of per-run state: one [`StatsAccumulator`], one
//! [`SegmentAggregator`] and the last accepted sample. A session is
//! constructed for a run and dropped when the run ends, so nothing leaks
//! from one run into the next.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//!                    |                  |
//!                    +------stop--------+--> Stopped
//! ```
//!
//! Pausing and stopping flush the in-progress segment before anything else
//! happens, so no accepted distance is dropped. The segment after a pause
//! starts at its first post-resume fix, so paused time never lands in a
//! segment's duration.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::evaluator::{evaluate, EvaluationResult, RejectionReason};
use crate::segments::{Segment, SegmentAggregator};
use crate::stats::{FusionSample, Pace, RunningStats, StatsAccumulator};
use crate::RawSample;

/// Lifecycle state of a run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Result of handling one raw sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SampleOutcome {
    pub evaluation: EvaluationResult,
    pub stats: RunningStats,
    /// Whether this sample finalized a segment
    pub segment_created: bool,
    /// Total accepted distance so far in meters
    pub total_distance_meters: f64,
}

/// Finished-record payload for the remote "end running" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RunRecord {
    pub record_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub distance_meters: f64,
    /// Active (non-paused) duration in seconds
    pub duration_sec: f64,
    pub average_pace_sec_per_km: u32,
    pub average_speed_kmh: f64,
    pub calories: f64,
    pub average_heart_rate: Option<u32>,
    pub max_heart_rate: Option<u32>,
    pub average_cadence: Option<u32>,
    pub segment_count: u32,
}

/// Everything produced when a run is stopped.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FinishedRun {
    pub record: RunRecord,
    /// Segments not yet taken for incremental upload, including the final flush
    pub segments: Vec<Segment>,
    pub final_stats: RunningStats,
}

/// Running mean of optional sensor readings.
#[derive(Debug, Clone, Copy, Default)]
struct SensorTotals {
    heart_rate_sum: u64,
    heart_rate_count: u32,
    heart_rate_max: Option<u32>,
    cadence_sum: u64,
    cadence_count: u32,
}

impl SensorTotals {
    fn observe(&mut self, bpm: Option<u32>, cadence: Option<u32>) {
        if let Some(bpm) = bpm {
            self.heart_rate_sum += u64::from(bpm);
            self.heart_rate_count += 1;
            self.heart_rate_max = Some(self.heart_rate_max.map_or(bpm, |m| m.max(bpm)));
        }
        if let Some(cadence) = cadence {
            self.cadence_sum += u64::from(cadence);
            self.cadence_count += 1;
        }
    }

    fn average_heart_rate(&self) -> Option<u32> {
        (self.heart_rate_count > 0)
            .then(|| (self.heart_rate_sum / u64::from(self.heart_rate_count)) as u32)
    }

    fn average_cadence(&self) -> Option<u32> {
        (self.cadence_count > 0).then(|| (self.cadence_sum / u64::from(self.cadence_count)) as u32)
    }
}

/// The active run: evaluator input, live stats and segmentation in one place.
#[derive(Debug, Clone)]
pub struct RunSession {
    record_id: String,
    config: TrackerConfig,
    state: RunState,

    stats: StatsAccumulator,
    segments: SegmentAggregator,

    /// Last sample accepted for distance (or the seed sample)
    last_accepted: Option<RawSample>,
    /// Path points accepted since the last distance update
    pending_path: Vec<RawSample>,
    total_distance: f64,

    started_at_ms: Option<i64>,
    /// Active time banked before the current running stretch
    active_ms: i64,
    running_since_ms: Option<i64>,
    last_sample_ms: Option<i64>,

    sensors: SensorTotals,
    accepted_samples: u32,
    rejected_samples: u32,
}

impl RunSession {
    pub fn new(record_id: impl Into<String>, config: TrackerConfig) -> Self {
        Self {
            record_id: record_id.into(),
            stats: StatsAccumulator::new(config.stats.clone()),
            segments: SegmentAggregator::new(),
            config,
            state: RunState::Idle,
            last_accepted: None,
            pending_path: Vec::new(),
            total_distance: 0.0,
            started_at_ms: None,
            active_ms: 0,
            running_since_ms: None,
            last_sample_ms: None,
            sensors: SensorTotals::default(),
            accepted_samples: 0,
            rejected_samples: 0,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin recording. Stats and segments start from empty.
    pub fn start(&mut self, started_at_ms: i64) -> Result<()> {
        if matches!(self.state, RunState::Running | RunState::Paused) {
            return Err(TrackerError::Lifecycle {
                message: format!("run {} is already active", self.record_id),
            });
        }
        self.reset();
        self.segments.initialize_segment_tracking();
        self.started_at_ms = Some(started_at_ms);
        self.running_since_ms = Some(started_at_ms);
        self.state = RunState::Running;
        info!("[RunSession] Started run {}", self.record_id);
        Ok(())
    }

    /// Pause recording and flush the in-progress segment.
    pub fn pause(&mut self, now_ms: i64) {
        if self.state != RunState::Running {
            warn!("[RunSession] pause ignored in state {:?}", self.state);
            return;
        }
        self.bank_active_time(now_ms);
        self.segments.finalize_before_gap();
        // The runner may move while paused; re-seed on resume
        self.last_accepted = None;
        self.drop_pending_path("pause");
        self.state = RunState::Paused;
        info!(
            "[RunSession] Paused run {} at {:.0} m",
            self.record_id, self.total_distance
        );
    }

    pub fn resume(&mut self, now_ms: i64) {
        if self.state != RunState::Paused {
            warn!("[RunSession] resume ignored in state {:?}", self.state);
            return;
        }
        self.running_since_ms = Some(now_ms);
        self.state = RunState::Running;
        info!("[RunSession] Resumed run {}", self.record_id);
    }

    /// Finish the run: flush, freeze stats, build the record.
    pub fn stop(&mut self, ended_at_ms: i64) -> Result<FinishedRun> {
        let started_at_ms = match (self.state, self.started_at_ms) {
            (RunState::Running | RunState::Paused, Some(started)) => started,
            _ => {
                return Err(TrackerError::Lifecycle {
                    message: format!(
                        "cannot stop run {} in state {:?}",
                        self.record_id, self.state
                    ),
                })
            }
        };

        if self.state == RunState::Running {
            self.bank_active_time(ended_at_ms);
        }
        self.drop_pending_path("stop");
        self.segments.finalize_current_segment();
        self.state = RunState::Stopped;

        let duration_sec = self.active_ms as f64 / 1000.0;
        let final_stats = self.stats.update_stats(
            self.total_distance,
            duration_sec,
            None,
            None,
            None,
        );

        let km = self.total_distance / 1000.0;
        let record = RunRecord {
            record_id: self.record_id.clone(),
            started_at_ms,
            ended_at_ms,
            distance_meters: self.total_distance,
            duration_sec,
            average_pace_sec_per_km: if km > 0.0 {
                Pace::from_seconds_per_km(duration_sec / km).total_seconds
            } else {
                0
            },
            average_speed_kmh: final_stats.speed,
            calories: final_stats.calories,
            average_heart_rate: self.sensors.average_heart_rate(),
            max_heart_rate: self.sensors.heart_rate_max,
            average_cadence: self.sensors.average_cadence(),
            segment_count: self.segments.segment_count(),
        };

        info!(
            "[RunSession] Stopped run {}: {:.0} m in {:.0} s, {} segments ({} accepted / {} rejected samples)",
            self.record_id,
            record.distance_meters,
            record.duration_sec,
            record.segment_count,
            self.accepted_samples,
            self.rejected_samples
        );

        Ok(FinishedRun {
            record,
            segments: self.segments.take_finished_segments(),
            final_stats,
        })
    }

    /// Discard the run. Stats and segments are cleared together.
    pub fn reset(&mut self) {
        self.stats.reset_stats();
        self.segments.reset_segments();
        self.state = RunState::Idle;
        self.last_accepted = None;
        self.pending_path.clear();
        self.total_distance = 0.0;
        self.started_at_ms = None;
        self.active_ms = 0;
        self.running_since_ms = None;
        self.last_sample_ms = None;
        self.sensors = SensorTotals::default();
        self.accepted_samples = 0;
        self.rejected_samples = 0;
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    /// Process one raw fix from the location provider.
    ///
    /// Returns `None` when the session is not running; the fix is dropped.
    pub fn handle_sample(&mut self, sample: RawSample) -> Option<SampleOutcome> {
        if self.state != RunState::Running {
            debug!("[RunSession] Dropping sample while {:?}", self.state);
            return None;
        }

        let evaluation = evaluate(
            self.last_accepted.as_ref(),
            &sample,
            &self.config.evaluator,
        );
        self.last_sample_ms = Some(sample.timestamp_ms);

        let is_seed = self.last_accepted.is_none();
        let mut segment_created = false;

        if evaluation.accepted_for_distance {
            self.total_distance += evaluation.distance_meters;
            self.last_accepted = Some(sample);
            if evaluation.accepted_for_path {
                self.pending_path.push(sample);
            }
            segment_created = self.segments.process_distance_update(
                evaluation.distance_meters,
                &self.pending_path,
                self.config.segments.threshold_meters,
            );
            self.pending_path.clear();
        } else if evaluation.accepted_for_path {
            if is_seed {
                self.last_accepted = Some(sample);
            }
            self.pending_path.push(sample);
        }

        if evaluation.is_rejected() {
            self.rejected_samples += 1;
            debug!(
                "[RunSession] Rejected sample at {}: {:?}",
                sample.timestamp_ms, evaluation.rejection
            );
        } else {
            self.accepted_samples += 1;
        }

        let fusion = if evaluation.accepted_for_pace {
            Some(FusionSample {
                timestamp_ms: sample.timestamp_ms,
                speed_mps: sample.speed_mps,
                accuracy_meters: sample.accuracy_meters,
                distance_delta_meters: evaluation.distance_meters,
            })
        } else if evaluation.rejection == Some(RejectionReason::Stationary) {
            // Standing still still counts toward the decay window
            Some(FusionSample {
                timestamp_ms: sample.timestamp_ms,
                speed_mps: sample.speed_mps,
                accuracy_meters: sample.accuracy_meters,
                distance_delta_meters: 0.0,
            })
        } else {
            None
        };

        let elapsed = self.elapsed_seconds_at(sample.timestamp_ms);
        let stats = self
            .stats
            .update_stats(self.total_distance, elapsed, None, None, fusion);

        Some(SampleOutcome {
            evaluation,
            stats,
            segment_created,
            total_distance_meters: self.total_distance,
        })
    }

    /// Feed heart-rate/cadence readings from paired sensors.
    pub fn record_sensors(&mut self, bpm: Option<u32>, cadence: Option<u32>) -> RunningStats {
        if self.state == RunState::Running {
            self.sensors.observe(bpm, cadence);
            self.segments.record_sensors(bpm, cadence);
        }
        let elapsed = self.stats.elapsed_seconds();
        self.stats
            .update_stats(self.total_distance, elapsed, bpm, cadence, None)
    }

    /// Align elapsed time with an external timer.
    pub fn set_elapsed_time(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.active_ms = (seconds * 1000.0).round() as i64;
        if self.state == RunState::Running {
            self.running_since_ms = self.last_sample_ms.or(self.running_since_ms);
        }
        self.stats.set_elapsed_time(seconds);
    }

    /// Drain finalized segments for incremental upload.
    pub fn take_finished_segments(&mut self) -> Vec<Segment> {
        self.segments.take_finished_segments()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn stats(&self) -> &RunningStats {
        self.stats.stats()
    }

    pub fn segments(&self) -> &SegmentAggregator {
        &self.segments
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn elapsed_seconds_at(&self, now_ms: i64) -> f64 {
        let running = self
            .running_since_ms
            .map_or(0, |since| (now_ms - since).max(0));
        (self.active_ms + running) as f64 / 1000.0
    }

    /// Path-only points never followed by a distance update carry no
    /// distance and are not part of any segment.
    fn drop_pending_path(&mut self, at: &str) {
        if !self.pending_path.is_empty() {
            debug!(
                "[RunSession] Discarding {} path-only point(s) at {}",
                self.pending_path.len(),
                at
            );
            self.pending_path.clear();
        }
    }

    fn bank_active_time(&mut self, now_ms: i64) {
        if let Some(since) = self.running_since_ms.take() {
            self.active_ms += (now_ms - since).max(0);
        }
    }
}
