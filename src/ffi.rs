//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The run session is exposed as a UniFFI object so each run owns its own
//! state. The sync coordinator outlives runs, so it lives in a global that
//! the app initializes once with its database path and credentials. All
//! free functions are prefixed with `ffi_` to avoid naming conflicts with
//! the internal API.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use crate::{
    evaluate, init_logging, Credentials, Delivery, EvaluationResult, EvaluatorConfig, FinishedRun,
    HttpRemoteService, PendingKind, PendingUpload, RawSample, RetryPolicy, RunRecord, RunSession,
    RunState, RunningStats, SampleOutcome, Segment, SqlitePendingStore, SyncCoordinator,
    SyncReport, TrackerConfig, TrackerError,
};

// ============================================================================
// Stateless helpers
// ============================================================================

/// Evaluate one fix against the previous accepted fix.
#[uniffi::export]
pub fn ffi_evaluate(
    previous_accepted: Option<RawSample>,
    candidate: RawSample,
    config: EvaluatorConfig,
) -> EvaluationResult {
    evaluate(previous_accepted.as_ref(), &candidate, &config)
}

#[uniffi::export]
pub fn ffi_default_config() -> TrackerConfig {
    TrackerConfig::default()
}

/// Parse a (possibly partial) JSON config. Returns `None` if it is invalid.
#[uniffi::export]
pub fn ffi_config_from_json(json: String) -> Option<TrackerConfig> {
    init_logging();
    match TrackerConfig::from_json(&json) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("[RunTrackerFfi] Rejected config: {}", e);
            None
        }
    }
}

// ============================================================================
// Run session
// ============================================================================

/// One run, owned by the app for as long as the run screen lives.
#[derive(uniffi::Object)]
pub struct FfiRunSession {
    inner: Mutex<RunSession>,
}

impl FfiRunSession {
    fn session(&self) -> MutexGuard<'_, RunSession> {
        // Session state stays consistent across a panicked caller
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[uniffi::export]
impl FfiRunSession {
    #[uniffi::constructor]
    pub fn new(record_id: String, config: TrackerConfig) -> Arc<Self> {
        init_logging();
        Arc::new(Self {
            inner: Mutex::new(RunSession::new(record_id, config)),
        })
    }

    /// Returns false if the run is already active.
    pub fn start(&self, started_at_ms: i64) -> bool {
        match self.session().start(started_at_ms) {
            Ok(()) => true,
            Err(e) => {
                warn!("[RunTrackerFfi] {}", e);
                false
            }
        }
    }

    pub fn handle_sample(&self, sample: RawSample) -> Option<SampleOutcome> {
        self.session().handle_sample(sample)
    }

    pub fn record_sensors(&self, bpm: Option<u32>, cadence: Option<u32>) -> RunningStats {
        self.session().record_sensors(bpm, cadence)
    }

    pub fn set_elapsed_time(&self, seconds: f64) {
        self.session().set_elapsed_time(seconds);
    }

    pub fn pause(&self, now_ms: i64) {
        self.session().pause(now_ms);
    }

    pub fn resume(&self, now_ms: i64) {
        self.session().resume(now_ms);
    }

    /// Returns `None` if the run was never started or already stopped.
    pub fn stop(&self, ended_at_ms: i64) -> Option<FinishedRun> {
        match self.session().stop(ended_at_ms) {
            Ok(finished) => Some(finished),
            Err(e) => {
                warn!("[RunTrackerFfi] {}", e);
                None
            }
        }
    }

    pub fn reset(&self) {
        self.session().reset();
    }

    pub fn take_finished_segments(&self) -> Vec<Segment> {
        self.session().take_finished_segments()
    }

    pub fn state(&self) -> RunState {
        self.session().state()
    }

    pub fn total_distance(&self) -> f64 {
        self.session().total_distance()
    }

    pub fn stats(&self) -> RunningStats {
        self.session().stats().clone()
    }
}

// ============================================================================
// Sync coordinator (global)
// ============================================================================

/// A pending upload as shown in the "failed uploads" list.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPendingUpload {
    pub id: i64,
    pub kind: PendingKind,
    pub record_id: String,
    pub attempts: u32,
    pub next_attempt_at_ms: i64,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
}

impl From<PendingUpload> for FfiPendingUpload {
    fn from(upload: PendingUpload) -> Self {
        Self {
            id: upload.id,
            kind: upload.kind,
            record_id: upload.record_id,
            attempts: upload.attempts,
            next_attempt_at_ms: upload.next_attempt_at_ms,
            last_error: upload.last_error,
            created_at_ms: upload.created_at_ms,
        }
    }
}

struct SyncHandle {
    runtime: Runtime,
    coordinator: SyncCoordinator<SqlitePendingStore, HttpRemoteService>,
}

/// Global sync handle.
///
/// Held as an `Arc` so a long sync does not block the lock; concurrent
/// syncs are rejected by the coordinator itself.
static SYNC: Lazy<Mutex<Option<Arc<SyncHandle>>>> = Lazy::new(|| Mutex::new(None));

fn sync_handle() -> Option<Arc<SyncHandle>> {
    let guard = SYNC.lock().ok()?;
    let handle = guard.clone();
    if handle.is_none() {
        warn!("[RunTrackerFfi] Sync used before ffi_sync_init");
    }
    handle
}

fn build_sync_handle(
    db_path: &str,
    base_url: &str,
    credentials: &Credentials,
    policy: RetryPolicy,
) -> Result<SyncHandle, TrackerError> {
    let runtime = Runtime::new().map_err(|e| TrackerError::Internal {
        message: format!("Failed to create tokio runtime: {}", e),
    })?;
    let store = Arc::new(SqlitePendingStore::new(db_path)?);
    let remote = HttpRemoteService::new(base_url, credentials)?;
    Ok(SyncHandle {
        runtime,
        coordinator: SyncCoordinator::new(store, remote, policy),
    })
}

/// Open the pending-upload database and configure the remote service.
/// Returns false if either could not be set up.
#[uniffi::export]
pub fn ffi_sync_init(
    db_path: String,
    base_url: String,
    credentials: Credentials,
    policy: RetryPolicy,
) -> bool {
    init_logging();
    info!("[RunTrackerFfi] Initializing sync with db: {}", db_path);

    match build_sync_handle(&db_path, &base_url, &credentials, policy) {
        Ok(handle) => match SYNC.lock() {
            Ok(mut guard) => {
                *guard = Some(Arc::new(handle));
                true
            }
            Err(_) => false,
        },
        Err(e) => {
            warn!("[RunTrackerFfi] Sync init failed: {}", e);
            false
        }
    }
}

/// Replay pending uploads. Blocks the calling thread; call off the UI thread.
#[uniffi::export]
pub fn ffi_sync_offline_data() -> Option<SyncReport> {
    let handle = sync_handle()?;
    handle
        .runtime
        .block_on(handle.coordinator.sync_offline_data())
}

/// Upload a finished run, queueing whatever cannot be delivered.
#[uniffi::export]
pub fn ffi_submit_finished_run(record: RunRecord, segments: Vec<Segment>) -> Option<Delivery> {
    let handle = sync_handle()?;
    match handle
        .runtime
        .block_on(handle.coordinator.submit_finished_run(&record, &segments))
    {
        Ok(delivery) => Some(delivery),
        Err(e) => {
            warn!("[RunTrackerFfi] Submit of run {} lost: {}", record.record_id, e);
            None
        }
    }
}

/// Upload segments finished mid-run, queueing them on failure.
#[uniffi::export]
pub fn ffi_submit_segments(record_id: String, segments: Vec<Segment>) -> Option<Delivery> {
    let handle = sync_handle()?;
    match handle
        .runtime
        .block_on(handle.coordinator.submit_segments(&record_id, &segments))
    {
        Ok(delivery) => Some(delivery),
        Err(e) => {
            warn!("[RunTrackerFfi] Submit of segments for {} lost: {}", record_id, e);
            None
        }
    }
}

#[uniffi::export]
pub fn ffi_exhausted_uploads() -> Vec<FfiPendingUpload> {
    sync_handle()
        .and_then(|handle| handle.coordinator.exhausted_uploads().ok())
        .map(|uploads| uploads.into_iter().map(FfiPendingUpload::from).collect())
        .unwrap_or_default()
}

/// Re-queue exhausted uploads. Returns how many were re-queued.
#[uniffi::export]
pub fn ffi_retry_exhausted() -> u32 {
    sync_handle()
        .and_then(|handle| handle.coordinator.retry_exhausted().ok())
        .unwrap_or(0)
}
