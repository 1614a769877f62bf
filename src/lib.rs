//! # Run Tracker
//!
//! Running-session tracking core for a mobile running app.
//!
//! This library provides:
//! - GPS sample evaluation (accuracy, implausible jumps, stationary drift)
//! - Live running statistics with fused instantaneous pace
//! - Fixed-distance segmentation for incremental persistence
//! - Durable offline queue with replay of failed uploads
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed pending-upload queue (default)
//! - **`http`** - HTTP client for the remote run service
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_tracker::{RawSample, RunSession, TrackerConfig};
//!
//! let mut session = RunSession::new("run-42", TrackerConfig::default());
//! session.start(1_700_000_000_000).unwrap();
//!
//! // Feed fixes from the location provider, one per second
//! for i in 0..30 {
//!     let sample = RawSample::new(51.5074 + i as f64 * 0.00003, -0.1278, 1_700_000_000_000 + i * 1000)
//!         .with_speed(3.3)
//!         .with_accuracy(5.0);
//!     if let Some(outcome) = session.handle_sample(sample) {
//!         println!("{:.0} m, pace {}", outcome.total_distance_meters, outcome.stats.pace);
//!     }
//! }
//!
//! let finished = session.stop(1_700_000_030_000).unwrap();
//! assert!(finished.record.distance_meters > 0.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackerError};

// Tunable thresholds
pub mod config;
pub use config::{EvaluatorConfig, RetryPolicy, SegmentConfig, StatsConfig, TrackerConfig};

// Geographic utilities (haversine distance, offsets)
pub mod geo_utils;

// Stateless sample evaluation
pub mod evaluator;
pub use evaluator::{evaluate, EvaluationResult, RejectionReason};

// Live statistics
pub mod stats;
pub use stats::{FusionSample, Pace, RunningStats, StatsAccumulator};

// Fixed-distance segmentation
pub mod segments;
pub use segments::{Segment, SegmentAggregator};

// Wire format for the remote service
pub mod wire;
pub use wire::{WireLocation, WireSegment};

// Active run session (owns the stateful components)
pub mod session;
pub use session::{FinishedRun, RunRecord, RunSession, RunState, SampleOutcome};

// Pending-upload queue abstraction
pub mod pending;
pub use pending::{PendingKind, PendingPayload, PendingStore, PendingUpload};

// Offline sync coordinator
pub mod sync;
pub use sync::{Clock, Delivery, RemoteService, SyncCoordinator, SyncCounts, SyncReport};

// SQLite pending-upload queue
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqlitePendingStore;

// HTTP remote service
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{Credentials, HttpRemoteService};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// One raw positioning fix from the device's location provider.
///
/// # Example
/// ```
/// use run_tracker::RawSample;
/// let fix = RawSample::new(51.5074, -0.1278, 1_700_000_000_000)
///     .with_speed(3.0)
///     .with_accuracy(4.5);
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Device-reported speed in m/s. Negative means the device has no estimate.
    pub speed_mps: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy_meters: f64,
    /// Altitude in meters, when the provider reports one
    pub altitude: Option<f64>,
}

impl RawSample {
    /// Create a sample with unknown speed and perfect accuracy.
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            speed_mps: -1.0,
            accuracy_meters: 0.0,
            altitude: None,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = accuracy_meters;
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Whether the device supplied a speed estimate.
    pub fn has_speed(&self) -> bool {
        self.speed_mps.is_finite() && self.speed_mps >= 0.0
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

// ============================================================================
// Tests
// ============================================================================
