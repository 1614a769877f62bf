//! # Segment Aggregator
//!
//! Groups the accepted path/distance stream into fixed-size segments so that
//! a run never has to be held in memory as one raw GPS trace, and so partial
//! progress can be persisted and uploaded while the run is still going.
//!
//! A segment is finalized when the in-progress distance crosses the
//! threshold, or when the run is paused/stopped (forced flush). Finalized
//! segments are immutable and carry a contiguous `order_index`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::RawSample;

/// A finalized, immutable slice of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Segment {
    /// Position of this segment within the run (0-based, contiguous)
    pub order_index: u32,
    /// Distance in meters
    pub distance: f64,
    /// Duration in seconds
    pub duration_sec: f64,
    /// Cadence at the moment the segment was finalized
    pub cadence: Option<u32>,
    /// Heart rate at the moment the segment was finalized
    pub heart_rate: Option<u32>,
    /// Lowest heart rate seen while the segment was open
    pub min_heart_rate: Option<u32>,
    /// Highest heart rate seen while the segment was open
    pub max_heart_rate: Option<u32>,
    /// Unix timestamp in milliseconds of the segment start
    pub start_timestamp: i64,
    /// Path points collected for this segment, in arrival order
    pub locations: Vec<RawSample>,
}

impl Segment {
    /// Unix timestamp in milliseconds of the segment end.
    pub fn end_timestamp(&self) -> i64 {
        self.start_timestamp + (self.duration_sec * 1000.0).round() as i64
    }
}

/// Sensor readings tracked while a segment is open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SensorWindow {
    heart_rate: Option<u32>,
    cadence: Option<u32>,
    min_heart_rate: Option<u32>,
    max_heart_rate: Option<u32>,
}

impl SensorWindow {
    fn observe(&mut self, bpm: Option<u32>, cadence: Option<u32>) {
        if let Some(bpm) = bpm {
            self.heart_rate = Some(bpm);
            self.min_heart_rate = Some(self.min_heart_rate.map_or(bpm, |m| m.min(bpm)));
            self.max_heart_rate = Some(self.max_heart_rate.map_or(bpm, |m| m.max(bpm)));
        }
        if cadence.is_some() {
            self.cadence = cadence;
        }
    }

    /// Start a new window that keeps the latest readings as its baseline.
    fn roll(&mut self) {
        *self = SensorWindow {
            heart_rate: self.heart_rate,
            cadence: self.cadence,
            min_heart_rate: self.heart_rate,
            max_heart_rate: self.heart_rate,
        };
    }
}

/// Stateful segmenter for one run.
#[derive(Debug, Clone, Default)]
pub struct SegmentAggregator {
    initialized: bool,

    /// In-progress distance since the last flush
    segment_distance: f64,
    /// Path points since the last flush
    segment_locations: Vec<RawSample>,
    /// Start-time marker of the in-progress segment
    segment_start_ms: Option<i64>,

    sensors: SensorWindow,

    /// Finalized segments not yet taken by the caller
    current_segment_items: Vec<Segment>,
    /// Next order index to assign
    next_order_index: u32,
}

impl SegmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new run: clears everything and starts at order index 0.
    pub fn initialize_segment_tracking(&mut self) {
        self.reset_segments();
        self.initialized = true;
    }

    /// Feed a distance update with the path points that produced it.
    ///
    /// Returns `true` when the update crossed `threshold_meters` and a new
    /// segment was finalized. Non-positive deltas are ignored.
    pub fn process_distance_update(
        &mut self,
        distance_delta_meters: f64,
        new_locations: &[RawSample],
        threshold_meters: f64,
    ) -> bool {
        if !(distance_delta_meters > 0.0) {
            return false;
        }
        self.ensure_initialized("process_distance_update");

        self.segment_distance += distance_delta_meters;
        self.buffer_locations(new_locations);

        if self.segment_distance < threshold_meters {
            return false;
        }

        // The emitted distance is the update that caused the crossing
        self.flush(distance_delta_meters);
        true
    }

    /// Force-flush whatever is accumulated, even below threshold.
    ///
    /// Returns `true` if a segment was created. Nothing is created when no
    /// distance and no locations are buffered.
    pub fn finalize_current_segment(&mut self) -> bool {
        if self.segment_distance <= 0.0 && self.segment_locations.is_empty() {
            return false;
        }
        self.ensure_initialized("finalize_current_segment");
        self.flush(self.segment_distance);
        true
    }

    /// Flush for a gap in recording (pause). The segment after the gap
    /// starts at its own first location instead of where this one ended.
    pub fn finalize_before_gap(&mut self) -> bool {
        let created = self.finalize_current_segment();
        self.segment_start_ms = None;
        created
    }

    /// Clear all in-progress and finalized segment state.
    pub fn reset_segments(&mut self) {
        self.segment_distance = 0.0;
        self.segment_locations.clear();
        self.segment_start_ms = None;
        self.sensors = SensorWindow::default();
        self.current_segment_items.clear();
        self.next_order_index = 0;
        self.initialized = false;
    }

    /// Feed heart-rate/cadence readings for the open segment.
    pub fn record_sensors(&mut self, bpm: Option<u32>, cadence: Option<u32>) {
        self.sensors.observe(bpm, cadence);
    }

    /// Drain finalized segments for upload. Order indices keep counting.
    pub fn take_finished_segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.current_segment_items)
    }

    pub fn segment_distance(&self) -> f64 {
        self.segment_distance
    }

    pub fn segment_locations(&self) -> &[RawSample] {
        &self.segment_locations
    }

    pub fn segment_start_ms(&self) -> Option<i64> {
        self.segment_start_ms
    }

    /// Finalized segments not yet taken.
    pub fn current_segment_items(&self) -> &[Segment] {
        &self.current_segment_items
    }

    /// Total number of segments finalized since initialization.
    pub fn segment_count(&self) -> u32 {
        self.next_order_index
    }

    fn ensure_initialized(&mut self, operation: &str) {
        if !self.initialized {
            warn!(
                "[SegmentAggregator] {} called before initialize_segment_tracking; initializing now",
                operation
            );
            self.initialized = true;
        }
    }

    fn buffer_locations(&mut self, new_locations: &[RawSample]) {
        if self.segment_start_ms.is_none() {
            self.segment_start_ms = new_locations.first().map(|l| l.timestamp_ms);
        }
        self.segment_locations.extend_from_slice(new_locations);
    }

    fn flush(&mut self, distance: f64) {
        let locations = std::mem::take(&mut self.segment_locations);
        let start = self
            .segment_start_ms
            .or_else(|| locations.first().map(|l| l.timestamp_ms));
        let start_timestamp = start.unwrap_or(0);
        let end_timestamp = locations
            .last()
            .map(|l| l.timestamp_ms)
            .unwrap_or(start_timestamp)
            .max(start_timestamp);

        let segment = Segment {
            order_index: self.next_order_index,
            distance,
            duration_sec: (end_timestamp - start_timestamp) as f64 / 1000.0,
            cadence: self.sensors.cadence,
            heart_rate: self.sensors.heart_rate,
            min_heart_rate: self.sensors.min_heart_rate,
            max_heart_rate: self.sensors.max_heart_rate,
            start_timestamp,
            locations,
        };

        debug!(
            "[SegmentAggregator] Segment {} finalized: {:.1} m, {:.0} s, {} points",
            segment.order_index,
            segment.distance,
            segment.duration_sec,
            segment.locations.len()
        );

        self.next_order_index += 1;
        self.current_segment_items.push(segment);

        // The next segment starts where this one ended
        self.segment_distance = 0.0;
        self.segment_start_ms = start.map(|_| end_timestamp);
        self.sensors.roll();
    }
}
