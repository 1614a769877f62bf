//! Pending-upload queue abstraction.
//!
//! Anything that could not be delivered to the remote service is parked here
//! until the next sync. The SQLite implementation lives in
//! [`crate::persistence`]; tests use in-memory doubles.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segments::Segment;
use crate::session::RunRecord;

/// What a queued item will be delivered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PendingKind {
    /// A finished run for the "end running" call
    Record,
    /// A batch of segments for the "save segment items" call
    Segments,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Record => "record",
            PendingKind::Segments => "segments",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "record" => Some(PendingKind::Record),
            "segments" => Some(PendingKind::Segments),
            _ => None,
        }
    }
}

/// Queued payload, stored as a MessagePack blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingPayload {
    Record(RunRecord),
    Segments {
        record_id: String,
        items: Vec<Segment>,
    },
}

impl PendingPayload {
    pub fn kind(&self) -> PendingKind {
        match self {
            PendingPayload::Record(_) => PendingKind::Record,
            PendingPayload::Segments { .. } => PendingKind::Segments,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            PendingPayload::Record(record) => &record.record_id,
            PendingPayload::Segments { record_id, .. } => record_id,
        }
    }
}

/// One row of the pending queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub id: i64,
    pub kind: PendingKind,
    pub record_id: String,
    pub payload: PendingPayload,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// Earliest time (ms) the next attempt may run
    pub next_attempt_at_ms: i64,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
    /// Excluded from automatic retry until explicitly re-queued
    pub exhausted: bool,
}

impl PendingUpload {
    pub fn is_due(&self, now_ms: i64) -> bool {
        !self.exhausted && self.next_attempt_at_ms <= now_ms
    }
}

/// Durable queue of uploads awaiting delivery.
///
/// Enqueue appends, dequeue removes by id. Implementations serialize their
/// own access so a store can be shared behind an `Arc`.
pub trait PendingStore: Send + Sync {
    /// Records still eligible for automatic retry (due or not).
    fn pending_record_count(&self) -> Result<u32>;

    /// Segment batches still eligible for automatic retry (due or not).
    fn pending_segment_count(&self) -> Result<u32>;

    fn enqueue_record(&self, record: &RunRecord, now_ms: i64) -> Result<i64>;

    fn enqueue_segment_batch(
        &self,
        record_id: &str,
        segments: &[Segment],
        now_ms: i64,
    ) -> Result<i64>;

    fn remove_record(&self, id: i64) -> Result<()>;

    fn remove_segment_batch(&self, id: i64) -> Result<()>;

    /// Non-exhausted records, oldest first.
    fn pending_records(&self) -> Result<Vec<PendingUpload>>;

    /// Non-exhausted segment batches, oldest first.
    fn pending_segment_batches(&self) -> Result<Vec<PendingUpload>>;

    /// Count a failed attempt and schedule the next one.
    fn record_failure(
        &self,
        id: i64,
        next_attempt_at_ms: i64,
        error: &str,
        exhausted: bool,
    ) -> Result<()>;

    fn exhausted_uploads(&self) -> Result<Vec<PendingUpload>>;

    /// Move every exhausted item back to pending with a fresh attempt budget.
    /// Returns how many were re-queued.
    fn retry_exhausted(&self, now_ms: i64) -> Result<u32>;
}
