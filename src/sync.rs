//! # Sync Coordinator
//!
//! Replays uploads that failed while offline. Every queued record and
//! segment batch is attempted independently: successes are dequeued,
//! failures stay queued with a capped, jittered backoff.
//!
//! ## Guarantees
//!
//! - Nothing pending means no listing and no network call.
//! - `sync_offline_data` never returns an error. Failures are logged and
//!   counted; an unexpected failure yields `None`.
//! - At most one sync runs at a time. A concurrent call returns `None`.
//! - Items whose attempts reach `max_attempts`, or that the server rejected
//!   outright, are marked exhausted and only retried on request.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;
use crate::error::{Result, TrackerError};
use crate::pending::{PendingKind, PendingPayload, PendingStore, PendingUpload};
use crate::segments::Segment;
use crate::session::RunRecord;
use crate::wire::{to_wire_segments, WireSegment};

/// Remote run service.
pub trait RemoteService: Send + Sync {
    /// Deliver a finished run.
    fn end_running(&self, record: &RunRecord) -> impl Future<Output = Result<()>> + Send;

    /// Deliver a batch of segment items for a run.
    fn save_segment_items(
        &self,
        record_id: &str,
        segments: &[WireSegment],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SyncCounts {
    pub success: u32,
    pub failed: u32,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SyncReport {
    pub records: SyncCounts,
    pub segments: SyncCounts,
    /// Items skipped because their backoff has not elapsed
    pub deferred: u32,
    /// Items that failed and were moved to the exhausted state in this pass
    pub exhausted: u32,
}

/// How a submission ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Delivery {
    /// Delivered to the remote service
    Sent,
    /// Parked in the pending queue for the next sync
    Queued,
}

impl RetryPolicy {
    /// Backoff before the attempt following `failed_attempts` failures.
    ///
    /// `delay = min(initial * 2^(failed_attempts - 1), max) + jitter`, where
    /// jitter is uniform in `[0, jitter_ratio * delay]`.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay_ms(failed_attempts);
        let jitter = if self.jitter_ratio > 0.0 && base > 0 {
            let max_jitter = (base as f64 * self.jitter_ratio) as u64;
            rand::thread_rng().gen_range(0..=max_jitter)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }

    fn base_delay_ms(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        self.initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }
}

/// Clears the in-flight flag when a sync pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the only durable state in the tracker and outlives individual runs.
pub struct SyncCoordinator<S, R> {
    store: Arc<S>,
    remote: R,
    policy: RetryPolicy,
    clock: Clock,
    in_flight: AtomicBool,
}

impl<S: PendingStore, R: RemoteService> SyncCoordinator<S, R> {
    pub fn new(store: Arc<S>, remote: R, policy: RetryPolicy) -> Self {
        Self {
            store,
            remote,
            policy,
            clock: system_clock(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Replace the wall clock (tests drive backoff with a fixed clock).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replay every due pending upload.
    ///
    /// Returns `None` when nothing is pending, when another sync is already
    /// running, or when the queue itself could not be read.
    pub async fn sync_offline_data(&self) -> Option<SyncReport> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!("[SyncCoordinator] Sync already in progress, skipping");
            return None;
        };

        match self.replay().await {
            Ok(report) => report,
            Err(e) => {
                error!("[SyncCoordinator] Sync aborted: {}", e);
                None
            }
        }
    }

    async fn replay(&self) -> Result<Option<SyncReport>> {
        let record_count = self.store.pending_record_count()?;
        let segment_count = self.store.pending_segment_count()?;
        if record_count == 0 && segment_count == 0 {
            debug!("[SyncCoordinator] Nothing pending");
            return Ok(None);
        }

        info!(
            "[SyncCoordinator] Replaying {} records and {} segment batches",
            record_count, segment_count
        );

        let now = (self.clock)();
        let mut report = SyncReport::default();

        // Segments go before the record that closes the run
        for item in self.store.pending_segment_batches()? {
            self.replay_item(&item, now, &mut report).await;
        }
        for item in self.store.pending_records()? {
            self.replay_item(&item, now, &mut report).await;
        }

        info!(
            "[SyncCoordinator] Sync done: records {}/{} ok, segments {}/{} ok, {} deferred, {} exhausted",
            report.records.success,
            report.records.success + report.records.failed,
            report.segments.success,
            report.segments.success + report.segments.failed,
            report.deferred,
            report.exhausted
        );

        Ok(Some(report))
    }

    async fn replay_item(&self, item: &PendingUpload, now: i64, report: &mut SyncReport) {
        if !item.is_due(now) {
            report.deferred += 1;
            return;
        }

        let result = self.deliver(&item.payload).await;
        let counts = match item.kind {
            PendingKind::Record => &mut report.records,
            PendingKind::Segments => &mut report.segments,
        };

        match result {
            Ok(()) => {
                counts.success += 1;
                let removed = match item.kind {
                    PendingKind::Record => self.store.remove_record(item.id),
                    PendingKind::Segments => self.store.remove_segment_batch(item.id),
                };
                if let Err(e) = removed {
                    // Delivered but still queued: the next pass sends it again
                    warn!(
                        "[SyncCoordinator] Failed to dequeue {} {}: {}",
                        item.kind.as_str(),
                        item.id,
                        e
                    );
                }
            }
            Err(e) => {
                counts.failed += 1;
                match self.schedule_retry(item, &e, now) {
                    Ok(true) => report.exhausted += 1,
                    Ok(false) => {}
                    Err(store_err) => warn!(
                        "[SyncCoordinator] Failed to record failure for {} {}: {}",
                        item.kind.as_str(),
                        item.id,
                        store_err
                    ),
                }
            }
        }
    }

    async fn deliver(&self, payload: &PendingPayload) -> Result<()> {
        match payload {
            PendingPayload::Record(record) => self.remote.end_running(record).await,
            PendingPayload::Segments { record_id, items } => {
                self.remote
                    .save_segment_items(record_id, &to_wire_segments(items))
                    .await
            }
        }
    }

    /// Returns whether the item is now exhausted.
    fn schedule_retry(&self, item: &PendingUpload, e: &TrackerError, now: i64) -> Result<bool> {
        let attempts = item.attempts + 1;
        let exhausted = attempts >= self.policy.max_attempts || !e.is_transient();
        let delay = self.policy.delay_for_attempt(attempts);
        let next_attempt_at = now.saturating_add(delay.as_millis() as i64);

        if exhausted {
            warn!(
                "[SyncCoordinator] {} {} exhausted after {} attempts: {}",
                item.kind.as_str(),
                item.id,
                attempts,
                e
            );
        } else {
            debug!(
                "[SyncCoordinator] {} {} failed (attempt {}), retry in {} ms: {}",
                item.kind.as_str(),
                item.id,
                attempts,
                delay.as_millis(),
                e
            );
        }

        self.store
            .record_failure(item.id, next_attempt_at, &e.to_string(), exhausted)?;
        Ok(exhausted)
    }

    /// Upload the remaining segments and the finished record now, queueing
    /// whatever fails.
    pub async fn submit_finished_run(
        &self,
        record: &RunRecord,
        segments: &[Segment],
    ) -> Result<Delivery> {
        let segments_delivery = self.submit_segments(&record.record_id, segments).await?;

        let record_delivery = match self.remote.end_running(record).await {
            Ok(()) => {
                info!("[SyncCoordinator] Uploaded run {}", record.record_id);
                Delivery::Sent
            }
            Err(e) => {
                warn!(
                    "[SyncCoordinator] Upload of run {} failed, queueing: {}",
                    record.record_id, e
                );
                self.store.enqueue_record(record, (self.clock)())?;
                Delivery::Queued
            }
        };

        Ok(
            if segments_delivery == Delivery::Sent && record_delivery == Delivery::Sent {
                Delivery::Sent
            } else {
                Delivery::Queued
            },
        )
    }

    /// Upload a batch of finished segments now, queueing it on failure.
    pub async fn submit_segments(&self, record_id: &str, segments: &[Segment]) -> Result<Delivery> {
        if segments.is_empty() {
            return Ok(Delivery::Sent);
        }

        match self
            .remote
            .save_segment_items(record_id, &to_wire_segments(segments))
            .await
        {
            Ok(()) => {
                debug!(
                    "[SyncCoordinator] Uploaded {} segments for run {}",
                    segments.len(),
                    record_id
                );
                Ok(Delivery::Sent)
            }
            Err(e) => {
                warn!(
                    "[SyncCoordinator] Upload of {} segments for run {} failed, queueing: {}",
                    segments.len(),
                    record_id,
                    e
                );
                self.store
                    .enqueue_segment_batch(record_id, segments, (self.clock)())?;
                Ok(Delivery::Queued)
            }
        }
    }

    pub fn exhausted_uploads(&self) -> Result<Vec<PendingUpload>> {
        self.store.exhausted_uploads()
    }

    /// Give exhausted uploads a fresh attempt budget (explicit user action).
    pub fn retry_exhausted(&self) -> Result<u32> {
        let count = self.store.retry_exhausted((self.clock)())?;
        if count > 0 {
            info!("[SyncCoordinator] Re-queued {} exhausted uploads", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawSample;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, AtomicU32};
    use std::sync::Mutex;

    // ========================================================================
    // Test doubles
    // ========================================================================

    #[derive(Default)]
    struct MemoryStore {
        items: Mutex<Vec<PendingUpload>>,
        next_id: AtomicI64,
        list_calls: AtomicU32,
    }

    impl MemoryStore {
        fn push(&self, payload: PendingPayload, now_ms: i64) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.items.lock().unwrap().push(PendingUpload {
                id,
                kind: payload.kind(),
                record_id: payload.record_id().to_string(),
                payload,
                attempts: 0,
                next_attempt_at_ms: now_ms,
                last_error: None,
                created_at_ms: now_ms,
                exhausted: false,
            });
            id
        }

        fn get(&self, id: i64) -> Option<PendingUpload> {
            self.items.lock().unwrap().iter().find(|i| i.id == id).cloned()
        }

        fn count(&self, kind: PendingKind) -> u32 {
            self.items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.kind == kind && !i.exhausted)
                .count() as u32
        }

        fn list(&self, kind: PendingKind) -> Vec<PendingUpload> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.kind == kind && !i.exhausted)
                .cloned()
                .collect()
        }

        fn remove(&self, id: i64) {
            self.items.lock().unwrap().retain(|i| i.id != id);
        }
    }

    impl PendingStore for MemoryStore {
        fn pending_record_count(&self) -> Result<u32> {
            Ok(self.count(PendingKind::Record))
        }

        fn pending_segment_count(&self) -> Result<u32> {
            Ok(self.count(PendingKind::Segments))
        }

        fn enqueue_record(&self, record: &RunRecord, now_ms: i64) -> Result<i64> {
            Ok(self.push(PendingPayload::Record(record.clone()), now_ms))
        }

        fn enqueue_segment_batch(
            &self,
            record_id: &str,
            segments: &[Segment],
            now_ms: i64,
        ) -> Result<i64> {
            Ok(self.push(
                PendingPayload::Segments {
                    record_id: record_id.to_string(),
                    items: segments.to_vec(),
                },
                now_ms,
            ))
        }

        fn remove_record(&self, id: i64) -> Result<()> {
            self.remove(id);
            Ok(())
        }

        fn remove_segment_batch(&self, id: i64) -> Result<()> {
            self.remove(id);
            Ok(())
        }

        fn pending_records(&self) -> Result<Vec<PendingUpload>> {
            Ok(self.list(PendingKind::Record))
        }

        fn pending_segment_batches(&self) -> Result<Vec<PendingUpload>> {
            Ok(self.list(PendingKind::Segments))
        }

        fn record_failure(
            &self,
            id: i64,
            next_attempt_at_ms: i64,
            error: &str,
            exhausted: bool,
        ) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.attempts += 1;
                item.next_attempt_at_ms = next_attempt_at_ms;
                item.last_error = Some(error.to_string());
                item.exhausted = exhausted;
            }
            Ok(())
        }

        fn exhausted_uploads(&self) -> Result<Vec<PendingUpload>> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.exhausted)
                .cloned()
                .collect())
        }

        fn retry_exhausted(&self, now_ms: i64) -> Result<u32> {
            let mut count = 0;
            for item in self.items.lock().unwrap().iter_mut().filter(|i| i.exhausted) {
                item.exhausted = false;
                item.attempts = 0;
                item.next_attempt_at_ms = now_ms;
                count += 1;
            }
            Ok(count)
        }
    }

    /// Remote that fails for configured record ids.
    #[derive(Default)]
    struct MockRemote {
        failing: Mutex<HashSet<String>>,
        failure_status: Option<u16>,
        calls: AtomicU32,
        received_segments: Mutex<Vec<WireSegment>>,
        /// Endpoint hit per call, in call order
        endpoints: Mutex<Vec<&'static str>>,
    }

    impl MockRemote {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn check(&self, record_id: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(record_id) {
                return Err(TrackerError::Http {
                    message: "unreachable".into(),
                    status_code: self.failure_status,
                });
            }
            Ok(())
        }
    }

    impl RemoteService for MockRemote {
        async fn end_running(&self, record: &RunRecord) -> Result<()> {
            tokio::task::yield_now().await;
            self.endpoints.lock().unwrap().push("end");
            self.check(&record.record_id)
        }

        async fn save_segment_items(&self, record_id: &str, segments: &[WireSegment]) -> Result<()> {
            tokio::task::yield_now().await;
            self.endpoints.lock().unwrap().push("segments");
            self.check(record_id)?;
            self.received_segments
                .lock()
                .unwrap()
                .extend_from_slice(segments);
            Ok(())
        }
    }

    const NOW: i64 = 1_700_000_000_000;

    fn record(id: &str) -> RunRecord {
        RunRecord {
            record_id: id.to_string(),
            started_at_ms: NOW - 600_000,
            ended_at_ms: NOW,
            distance_meters: 1850.0,
            duration_sec: 600.0,
            average_pace_sec_per_km: 324,
            average_speed_kmh: 11.1,
            calories: 134.2,
            average_heart_rate: Some(152),
            max_heart_rate: Some(171),
            average_cadence: Some(168),
            segment_count: 2,
        }
    }

    fn segment(index: u32) -> Segment {
        let start = NOW - 60_000 + index as i64 * 30_000;
        Segment {
            order_index: index,
            distance: 100.0,
            duration_sec: 30.0,
            cadence: Some(170),
            heart_rate: Some(150),
            min_heart_rate: Some(140),
            max_heart_rate: Some(158),
            start_timestamp: start,
            locations: vec![
                RawSample::new(37.5665, 126.978, start).with_speed(3.3),
                RawSample::new(37.5674, 126.978, start + 30_000).with_speed(3.3),
            ],
        }
    }

    fn fixed_clock(now: i64) -> Clock {
        Arc::new(move || now)
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn coordinator(
        store: Arc<MemoryStore>,
        remote: MockRemote,
        policy: RetryPolicy,
    ) -> SyncCoordinator<MemoryStore, MockRemote> {
        SyncCoordinator::new(store, remote, policy).with_clock(fixed_clock(NOW))
    }

    // ========================================================================
    // Backoff
    // ========================================================================

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(60_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(120_000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(3_600_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(3_600_000));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 1..12 {
            let base = policy.base_delay_ms(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt).as_millis() as u64;
                assert!(delay >= base);
                assert!(delay <= base + (base as f64 * policy.jitter_ratio) as u64);
            }
        }
    }

    // ========================================================================
    // Replay
    // ========================================================================

    #[tokio::test]
    async fn test_nothing_pending_returns_none_without_listing() {
        let store = Arc::new(MemoryStore::default());
        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());

        assert_eq!(sync.sync_offline_data().await, None);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mixed_success_and_failure() {
        let store = Arc::new(MemoryStore::default());
        store.enqueue_record(&record("ok-1"), NOW).unwrap();
        let failed_id = store.enqueue_record(&record("down-1"), NOW).unwrap();
        store
            .enqueue_segment_batch("ok-1", &[segment(0), segment(1)], NOW)
            .unwrap();

        let sync = coordinator(store.clone(), MockRemote::failing(&["down-1"]), no_jitter());
        let report = sync.sync_offline_data().await.unwrap();

        assert_eq!(report.records, SyncCounts { success: 1, failed: 1 });
        assert_eq!(report.segments, SyncCounts { success: 1, failed: 0 });
        assert_eq!(report.deferred, 0);
        assert_eq!(report.exhausted, 0);

        // Only the failed record remains, rescheduled
        assert_eq!(store.pending_record_count().unwrap(), 1);
        assert_eq!(store.pending_segment_count().unwrap(), 0);
        let failed = store.get(failed_id).unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.next_attempt_at_ms, NOW + 30_000);
        assert!(failed.last_error.is_some());

        let sent = sync.remote.received_segments.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].start_time_stamp, segment(1).start_timestamp);
        assert_eq!(sent[1].end_time_stamp, segment(1).start_timestamp + 30_000);
    }

    #[tokio::test]
    async fn test_items_not_due_are_deferred() {
        let store = Arc::new(MemoryStore::default());
        let id = store.enqueue_record(&record("down-1"), NOW).unwrap();
        store.record_failure(id, NOW + 60_000, "timeout", false).unwrap();

        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());
        let report = sync.sync_offline_data().await.unwrap();

        assert_eq!(report.deferred, 1);
        assert_eq!(report.records, SyncCounts::default());
        assert_eq!(sync.remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.pending_record_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let store = Arc::new(MemoryStore::default());
        let id = store.enqueue_record(&record("down-1"), NOW).unwrap();
        let policy = RetryPolicy {
            max_attempts: 3,
            ..no_jitter()
        };
        let remote = MockRemote::failing(&["down-1"]);

        // Two failures leave it pending; each pass runs once the item is due
        for attempt in 0..3 {
            let due = store.get(id).unwrap().next_attempt_at_ms;
            let sync = SyncCoordinator::new(store.clone(), MockRemote::failing(&["down-1"]), policy.clone())
                .with_clock(fixed_clock(due));
            let report = sync.sync_offline_data().await.unwrap();
            assert_eq!(report.records.failed, 1);
            assert_eq!(report.exhausted, u32::from(attempt == 2));
        }

        assert_eq!(store.pending_record_count().unwrap(), 0);
        let exhausted = store.exhausted_uploads().unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].attempts, 3);

        // Exhausted items are not retried automatically
        let sync = coordinator(store.clone(), remote, policy);
        assert_eq!(sync.sync_offline_data().await, None);
        assert_eq!(sync.remote.calls.load(Ordering::SeqCst), 0);

        // Until the user asks
        sync.remote.heal();
        assert_eq!(sync.retry_exhausted().unwrap(), 1);
        let report = sync.sync_offline_data().await.unwrap();
        assert_eq!(report.records, SyncCounts { success: 1, failed: 0 });
        assert!(sync.exhausted_uploads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_payload_exhausts_immediately() {
        let store = Arc::new(MemoryStore::default());
        store.enqueue_record(&record("bad-1"), NOW).unwrap();
        let remote = MockRemote {
            failure_status: Some(422),
            ..MockRemote::failing(&["bad-1"])
        };

        let sync = coordinator(store.clone(), remote, no_jitter());
        let report = sync.sync_offline_data().await.unwrap();

        assert_eq!(report.exhausted, 1);
        assert_eq!(store.exhausted_uploads().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_returns_none() {
        let store = Arc::new(MemoryStore::default());
        store.enqueue_record(&record("ok-1"), NOW).unwrap();
        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());

        let (first, second) = tokio::join!(sync.sync_offline_data(), sync.sync_offline_data());

        assert!(first.is_some());
        assert_eq!(second, None);
        assert!(!sync.is_syncing());
        assert_eq!(sync.remote.calls.load(Ordering::SeqCst), 1);
    }

    // ========================================================================
    // Submission
    // ========================================================================

    #[tokio::test]
    async fn test_submit_sends_when_online() {
        let store = Arc::new(MemoryStore::default());
        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());

        let delivery = sync
            .submit_finished_run(&record("ok-1"), &[segment(0)])
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Sent);
        assert_eq!(store.pending_record_count().unwrap(), 0);
        assert_eq!(store.pending_segment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_queues_when_offline() {
        let store = Arc::new(MemoryStore::default());
        let sync = coordinator(store.clone(), MockRemote::failing(&["down-1"]), no_jitter());

        let delivery = sync
            .submit_finished_run(&record("down-1"), &[segment(0), segment(1)])
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Queued);
        assert_eq!(store.pending_record_count().unwrap(), 1);
        assert_eq!(store.pending_segment_count().unwrap(), 1);

        sync.remote.heal();
        let report = sync.sync_offline_data().await.unwrap();
        assert_eq!(report.records.success, 1);
        assert_eq!(report.segments.success, 1);
        assert_eq!(store.pending_record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replay_sends_segments_before_record() {
        let store = Arc::new(MemoryStore::default());
        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());
        sync.submit_finished_run(&record("ok-1"), &[segment(0)])
            .await
            .unwrap();
        let live_order = std::mem::take(&mut *sync.remote.endpoints.lock().unwrap());
        assert_eq!(live_order, vec!["segments", "end"]);

        // Record queued first, so store order alone would send it first
        store.enqueue_record(&record("ok-2"), NOW).unwrap();
        store.enqueue_segment_batch("ok-2", &[segment(0)], NOW).unwrap();
        let report = sync.sync_offline_data().await.unwrap();
        assert_eq!(report.records.success, 1);
        assert_eq!(report.segments.success, 1);
        assert_eq!(*sync.remote.endpoints.lock().unwrap(), live_order);
    }

    #[tokio::test]
    async fn test_submit_empty_segments_is_noop() {
        let store = Arc::new(MemoryStore::default());
        let sync = coordinator(store.clone(), MockRemote::default(), no_jitter());

        assert_eq!(sync.submit_segments("ok-1", &[]).await.unwrap(), Delivery::Sent);
        assert_eq!(sync.remote.calls.load(Ordering::SeqCst), 0);
    }
}
