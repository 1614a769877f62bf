//! # SQLite Pending Store
//!
//! Durable queue for uploads that could not be delivered. One table holds
//! both finished records and segment batches; payloads are MessagePack
//! blobs so the schema does not change when the payload shapes do.
//!
//! The connection sits behind a `Mutex`, so one store can be shared by the
//! sync coordinator and the submission path through an `Arc`.

use std::sync::{Mutex, MutexGuard};

use log::{info, warn};
use rusqlite::{params, Connection, Row};

use crate::error::{Result, TrackerError};
use crate::pending::{PendingKind, PendingPayload, PendingStore, PendingUpload};
use crate::segments::Segment;
use crate::session::RunRecord;

const STATUS_PENDING: &str = "pending";
const STATUS_EXHAUSTED: &str = "exhausted";

/// Row as stored, before the payload is decoded.
struct StoredRow {
    id: i64,
    kind: String,
    record_id: String,
    payload: Vec<u8>,
    attempts: u32,
    next_attempt_at_ms: i64,
    last_error: Option<String>,
    status: String,
    created_at_ms: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            record_id: row.get(2)?,
            payload: row.get(3)?,
            attempts: row.get(4)?,
            next_attempt_at_ms: row.get(5)?,
            last_error: row.get(6)?,
            status: row.get(7)?,
            created_at_ms: row.get(8)?,
        })
    }

    fn decode(self) -> Result<PendingUpload> {
        let kind = PendingKind::parse(&self.kind).ok_or_else(|| TrackerError::Serialization {
            message: format!("unknown pending kind '{}'", self.kind),
        })?;
        let payload: PendingPayload = rmp_serde::from_slice(&self.payload)?;
        if payload.kind() != kind {
            return Err(TrackerError::Serialization {
                message: format!("row {} is '{}' but holds a {:?} payload", self.id, self.kind, payload.kind()),
            });
        }
        Ok(PendingUpload {
            id: self.id,
            kind,
            record_id: self.record_id,
            payload,
            attempts: self.attempts,
            next_attempt_at_ms: self.next_attempt_at_ms,
            last_error: self.last_error,
            created_at_ms: self.created_at_ms,
            exhausted: self.status == STATUS_EXHAUSTED,
        })
    }
}

/// SQLite-backed [`PendingStore`].
pub struct SqlitePendingStore {
    db: Mutex<Connection>,
    db_path: String,
}

impl SqlitePendingStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the queue database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        Self::migrate_add_last_error(&db)?;

        let store = Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        };
        info!(
            "[PendingStore] Opened {} ({} records, {} segment batches pending)",
            store.db_path,
            store.pending_record_count()?,
            store.pending_segment_count()?
        );
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending_uploads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL CHECK(kind IN ('record', 'segments')),
                record_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL,
                last_error TEXT,
                status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'exhausted')),
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_kind_status ON pending_uploads(kind, status);
            CREATE INDEX IF NOT EXISTS idx_pending_record ON pending_uploads(record_id);
        "#,
        )?;
        Ok(())
    }

    /// Databases created before failures were recorded lack `last_error`.
    fn migrate_add_last_error(conn: &Connection) -> Result<()> {
        let column_exists: i64 = conn
            .prepare(
                "SELECT COUNT(*) FROM pragma_table_info('pending_uploads') WHERE name = 'last_error'",
            )?
            .query_row([], |row| row.get(0))?;

        if column_exists > 0 {
            return Ok(());
        }

        info!("[PendingStore] Running migration: add_last_error");
        conn.execute("ALTER TABLE pending_uploads ADD COLUMN last_error TEXT", [])?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrackerError::persistence("pending store mutex poisoned"))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn enqueue(&self, payload: &PendingPayload, now_ms: i64) -> Result<i64> {
        let blob = rmp_serde::to_vec(payload)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_uploads (kind, record_id, payload, attempts, next_attempt_at, status, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?4)",
            params![
                payload.kind().as_str(),
                payload.record_id(),
                blob,
                now_ms,
                STATUS_PENDING
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn count(&self, kind: PendingKind) -> Result<u32> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM pending_uploads WHERE kind = ?1 AND status = ?2",
            params![kind.as_str(), STATUS_PENDING],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn remove(&self, kind: PendingKind, id: i64) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM pending_uploads WHERE id = ?1 AND kind = ?2",
            params![id, kind.as_str()],
        )?;
        Ok(())
    }

    fn list(&self, kind: Option<PendingKind>, status: &str) -> Result<Vec<PendingUpload>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, kind, record_id, payload, attempts, next_attempt_at, last_error, status, created_at
                 FROM pending_uploads
                 WHERE (?1 IS NULL OR kind = ?1) AND status = ?2
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![kind.map(|k| k.as_str()), status], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut uploads = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.decode() {
                Ok(upload) => uploads.push(upload),
                Err(e) => warn!("[PendingStore] Skipping undecodable row {}: {}", id, e),
            }
        }
        Ok(uploads)
    }
}

impl PendingStore for SqlitePendingStore {
    fn pending_record_count(&self) -> Result<u32> {
        self.count(PendingKind::Record)
    }

    fn pending_segment_count(&self) -> Result<u32> {
        self.count(PendingKind::Segments)
    }

    fn enqueue_record(&self, record: &RunRecord, now_ms: i64) -> Result<i64> {
        let id = self.enqueue(&PendingPayload::Record(record.clone()), now_ms)?;
        info!("[PendingStore] Queued record {} as {}", record.record_id, id);
        Ok(id)
    }

    fn enqueue_segment_batch(
        &self,
        record_id: &str,
        segments: &[Segment],
        now_ms: i64,
    ) -> Result<i64> {
        let payload = PendingPayload::Segments {
            record_id: record_id.to_string(),
            items: segments.to_vec(),
        };
        let id = self.enqueue(&payload, now_ms)?;
        info!(
            "[PendingStore] Queued {} segments of {} as {}",
            segments.len(),
            record_id,
            id
        );
        Ok(id)
    }

    fn remove_record(&self, id: i64) -> Result<()> {
        self.remove(PendingKind::Record, id)
    }

    fn remove_segment_batch(&self, id: i64) -> Result<()> {
        self.remove(PendingKind::Segments, id)
    }

    fn pending_records(&self) -> Result<Vec<PendingUpload>> {
        self.list(Some(PendingKind::Record), STATUS_PENDING)
    }

    fn pending_segment_batches(&self) -> Result<Vec<PendingUpload>> {
        self.list(Some(PendingKind::Segments), STATUS_PENDING)
    }

    fn record_failure(
        &self,
        id: i64,
        next_attempt_at_ms: i64,
        error: &str,
        exhausted: bool,
    ) -> Result<()> {
        let status = if exhausted {
            STATUS_EXHAUSTED
        } else {
            STATUS_PENDING
        };
        self.conn()?.execute(
            "UPDATE pending_uploads
             SET attempts = attempts + 1, next_attempt_at = ?2, last_error = ?3, status = ?4
             WHERE id = ?1",
            params![id, next_attempt_at_ms, error, status],
        )?;
        Ok(())
    }

    fn exhausted_uploads(&self) -> Result<Vec<PendingUpload>> {
        self.list(None, STATUS_EXHAUSTED)
    }

    fn retry_exhausted(&self, now_ms: i64) -> Result<u32> {
        let changed = self.conn()?.execute(
            "UPDATE pending_uploads
             SET status = ?1, attempts = 0, next_attempt_at = ?2
             WHERE status = ?3",
            params![STATUS_PENDING, now_ms, STATUS_EXHAUSTED],
        )?;
        Ok(changed as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawSample;

    const NOW: i64 = 1_700_000_000_000;

    fn record(id: &str) -> RunRecord {
        RunRecord {
            record_id: id.to_string(),
            started_at_ms: NOW - 1_200_000,
            ended_at_ms: NOW,
            distance_meters: 3400.0,
            duration_sec: 1200.0,
            average_pace_sec_per_km: 353,
            average_speed_kmh: 10.2,
            calories: 246.5,
            average_heart_rate: None,
            max_heart_rate: None,
            average_cadence: Some(166),
            segment_count: 34,
        }
    }

    fn segments() -> Vec<Segment> {
        (0..3)
            .map(|i| Segment {
                order_index: i,
                distance: 100.0,
                duration_sec: 35.0,
                cadence: None,
                heart_rate: Some(148),
                min_heart_rate: Some(140),
                max_heart_rate: Some(155),
                start_timestamp: NOW + i as i64 * 35_000,
                locations: vec![RawSample::new(37.5665, 126.978, NOW + i as i64 * 35_000)
                    .with_speed(2.9)
                    .with_altitude(41.0)],
            })
            .collect()
    }

    #[test]
    fn test_create_store() {
        let store = SqlitePendingStore::in_memory().unwrap();
        assert_eq!(store.pending_record_count().unwrap(), 0);
        assert_eq!(store.pending_segment_count().unwrap(), 0);
    }

    #[test]
    fn test_enqueue_and_list() {
        let store = SqlitePendingStore::in_memory().unwrap();
        let record_id = store.enqueue_record(&record("run-1"), NOW).unwrap();
        store.enqueue_segment_batch("run-1", &segments(), NOW).unwrap();

        assert_eq!(store.pending_record_count().unwrap(), 1);
        assert_eq!(store.pending_segment_count().unwrap(), 1);

        let records = store.pending_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, record_id);
        assert_eq!(records[0].payload, PendingPayload::Record(record("run-1")));
        assert_eq!(records[0].next_attempt_at_ms, NOW);

        let batches = store.pending_segment_batches().unwrap();
        match &batches[0].payload {
            PendingPayload::Segments { record_id, items } => {
                assert_eq!(record_id, "run-1");
                assert_eq!(items, &segments());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_remove_is_kind_scoped() {
        let store = SqlitePendingStore::in_memory().unwrap();
        let id = store.enqueue_record(&record("run-1"), NOW).unwrap();

        store.remove_segment_batch(id).unwrap();
        assert_eq!(store.pending_record_count().unwrap(), 1);

        store.remove_record(id).unwrap();
        assert_eq!(store.pending_record_count().unwrap(), 0);
    }

    #[test]
    fn test_failure_and_exhaustion() {
        let store = SqlitePendingStore::in_memory().unwrap();
        let id = store.enqueue_record(&record("run-1"), NOW).unwrap();

        store.record_failure(id, NOW + 30_000, "HTTP error: timeout", false).unwrap();
        let item = &store.pending_records().unwrap()[0];
        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_attempt_at_ms, NOW + 30_000);
        assert_eq!(item.last_error.as_deref(), Some("HTTP error: timeout"));

        store.record_failure(id, NOW + 90_000, "HTTP error (400): bad", true).unwrap();
        assert_eq!(store.pending_record_count().unwrap(), 0);
        assert!(store.pending_records().unwrap().is_empty());

        let exhausted = store.exhausted_uploads().unwrap();
        assert_eq!(exhausted.len(), 1);
        assert!(exhausted[0].exhausted);
        assert_eq!(exhausted[0].attempts, 2);

        assert_eq!(store.retry_exhausted(NOW + 100_000).unwrap(), 1);
        let item = &store.pending_records().unwrap()[0];
        assert_eq!(item.attempts, 0);
        assert!(item.is_due(NOW + 100_000));
        assert!(store.exhausted_uploads().unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let store = SqlitePendingStore::in_memory().unwrap();
        store.enqueue_record(&record("run-1"), NOW).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO pending_uploads (kind, record_id, payload, next_attempt_at, created_at)
                 VALUES ('record', 'run-2', x'c1', 0, 0)",
                [],
            )
            .unwrap();

        assert_eq!(store.pending_record_count().unwrap(), 2);
        let records = store.pending_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "run-1");
    }

    #[test]
    fn test_migration_adds_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let path = path.to_str().unwrap();
        {
            let conn = Connection::open(path).unwrap();
            conn.execute_batch(
                "CREATE TABLE pending_uploads (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind TEXT NOT NULL,
                    record_id TEXT NOT NULL,
                    payload BLOB NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at INTEGER NOT NULL
                );",
            )
            .unwrap();
        }

        let store = SqlitePendingStore::new(path).unwrap();
        let id = store.enqueue_record(&record("run-1"), NOW).unwrap();
        store.record_failure(id, NOW, "offline", false).unwrap();
        assert_eq!(
            store.pending_records().unwrap()[0].last_error.as_deref(),
            Some("offline")
        );
    }
}
