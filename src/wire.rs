//! Wire shapes handed to the remote run service.
//!
//! The backend expects flattened GPS points and explicit start/end
//! timestamps rather than a start plus duration.

use serde::{Deserialize, Serialize};

use crate::{RawSample, Segment};

/// A GPS point as sent to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WireLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    pub speed: f64,
    pub altitude: Option<f64>,
    pub accuracy: f64,
}

impl From<&RawSample> for WireLocation {
    fn from(sample: &RawSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp_ms: sample.timestamp_ms,
            speed: sample.speed_mps,
            altitude: sample.altitude,
            accuracy: sample.accuracy_meters,
        }
    }
}

impl From<&WireLocation> for RawSample {
    fn from(point: &WireLocation) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp_ms: point.timestamp_ms,
            speed_mps: point.speed,
            accuracy_meters: point.accuracy,
            altitude: point.altitude,
        }
    }
}

/// A segment item as sent to the "save segment items" endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WireSegment {
    pub order_index: u32,
    pub distance: f64,
    pub duration_sec: f64,
    pub cadence: Option<u32>,
    pub heart_rate: Option<u32>,
    pub min_heart_rate: Option<u32>,
    pub max_heart_rate: Option<u32>,
    /// Serialized as `startTimeStamp`
    pub start_time_stamp: i64,
    /// Serialized as `endTimeStamp`; `start + duration`
    pub end_time_stamp: i64,
    pub gps_points: Vec<WireLocation>,
}

impl From<&Segment> for WireSegment {
    fn from(segment: &Segment) -> Self {
        Self {
            order_index: segment.order_index,
            distance: segment.distance,
            duration_sec: segment.duration_sec,
            cadence: segment.cadence,
            heart_rate: segment.heart_rate,
            min_heart_rate: segment.min_heart_rate,
            max_heart_rate: segment.max_heart_rate,
            start_time_stamp: segment.start_timestamp,
            end_time_stamp: segment.end_timestamp(),
            gps_points: segment.locations.iter().map(WireLocation::from).collect(),
        }
    }
}

impl From<&WireSegment> for Segment {
    fn from(wire: &WireSegment) -> Self {
        Self {
            order_index: wire.order_index,
            distance: wire.distance,
            duration_sec: wire.duration_sec,
            cadence: wire.cadence,
            heart_rate: wire.heart_rate,
            min_heart_rate: wire.min_heart_rate,
            max_heart_rate: wire.max_heart_rate,
            start_timestamp: wire.start_time_stamp,
            locations: wire.gps_points.iter().map(RawSample::from).collect(),
        }
    }
}

/// Translate a batch of segments for upload.
pub fn to_wire_segments(segments: &[Segment]) -> Vec<WireSegment> {
    segments.iter().map(WireSegment::from).collect()
}
