use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::query::FrameQuery;
use crate::record::FrameRecord;

/// Append-only log of frame records shared by every stream.
///
/// Implementations must make each append atomic: a concurrent reader sees
/// either the whole record or nothing.
pub trait FrameLog: Send + Sync {
    fn append(&self, record: &FrameRecord) -> Result<()>;

    /// Matching records sorted by `(video_id, frame_number)`.
    fn query(&self, query: &FrameQuery) -> Result<Vec<FrameRecord>>;

    fn last_frame_number(&self, video_id: &str, camera_id: &str) -> Result<Option<u64>>;
}

/// A record the log refuses to store. Retrying cannot help.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRejected {
    OutOfOrder {
        video_id: String,
        camera_id: String,
        frame_number: u64,
        last_frame_number: u64,
    },
    Invalid(String),
}

impl fmt::Display for RecordRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRejected::OutOfOrder {
                video_id,
                camera_id,
                frame_number,
                last_frame_number,
            } => write!(
                f,
                "frame {} for {}/{} does not follow last stored frame {}",
                frame_number, video_id, camera_id, last_frame_number
            ),
            RecordRejected::Invalid(reason) => write!(f, "invalid frame record: {}", reason),
        }
    }
}

impl std::error::Error for RecordRejected {}

fn check_order(record: &FrameRecord, last: Option<u64>) -> Result<()> {
    if let Some(last) = last {
        if record.frame_number <= last {
            return Err(RecordRejected::OutOfOrder {
                video_id: record.video_id.clone(),
                camera_id: record.camera_id.clone(),
                frame_number: record.frame_number,
                last_frame_number: last,
            }
            .into());
        }
    }
    Ok(())
}

fn encode_checked(record: &FrameRecord) -> Result<(String, String)> {
    record
        .validate()
        .map_err(|e| anyhow::Error::new(RecordRejected::Invalid(e.to_string())))?;
    record.encode()
}

fn to_sql_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

pub struct SqliteFrameLog {
    conn: Mutex<Connection>,
}

impl SqliteFrameLog {
    /// Open (or create) the log. Each handle owns one connection; several
    /// handles, in one process or many, may append to the same file.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open frame log {}", db_path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.ensure_schema()?;
        Ok(log)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS frame_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              video_id TEXT NOT NULL,
              camera_id TEXT NOT NULL,
              frame_number INTEGER NOT NULL,
              frame_timestamp REAL NOT NULL,
              captured_at_ms INTEGER NOT NULL,
              payload_json TEXT NOT NULL,
              payload_sha256 TEXT NOT NULL,
              UNIQUE(video_id, camera_id, frame_number)
            );

            CREATE INDEX IF NOT EXISTS idx_frames_captured ON frame_records(captured_at_ms);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("frame log connection lock poisoned"))
    }
}

impl FrameLog for SqliteFrameLog {
    fn append(&self, record: &FrameRecord) -> Result<()> {
        let (payload_json, digest) = encode_checked(record)?;
        let frame_number = to_sql_int(record.frame_number, "frame_number")?;
        let captured_at = to_sql_int(record.captured_at_ms, "captured_at_ms")?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let last: Option<i64> = tx.query_row(
            "SELECT MAX(frame_number) FROM frame_records WHERE video_id = ?1 AND camera_id = ?2",
            params![record.video_id, record.camera_id],
            |row| row.get(0),
        )?;
        check_order(record, last.map(|n| n as u64))?;

        tx.execute(
            r#"
            INSERT INTO frame_records(video_id, camera_id, frame_number, frame_timestamp,
                                      captured_at_ms, payload_json, payload_sha256)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.video_id,
                record.camera_id,
                frame_number,
                record.frame_timestamp,
                captured_at,
                payload_json,
                digest
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn query(&self, query: &FrameQuery) -> Result<Vec<FrameRecord>> {
        let mut sql = String::from("SELECT payload_json, payload_sha256 FROM frame_records WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();
        if let Some(video_id) = &query.video_id {
            values.push(Value::Text(video_id.clone()));
            sql.push_str(&format!(" AND video_id = ?{}", values.len()));
        }
        if let Some(camera_id) = &query.camera_id {
            values.push(Value::Text(camera_id.clone()));
            sql.push_str(&format!(" AND camera_id = ?{}", values.len()));
        }
        if let Some(from) = query.captured_from_ms {
            values.push(Value::Integer(to_sql_int(from, "captured_from_ms")?));
            sql.push_str(&format!(" AND captured_at_ms >= ?{}", values.len()));
        }
        if let Some(to) = query.captured_to_ms {
            values.push(Value::Integer(to_sql_int(to, "captured_to_ms")?));
            sql.push_str(&format!(" AND captured_at_ms < ?{}", values.len()));
        }
        sql.push_str(" ORDER BY video_id ASC, frame_number ASC, camera_id ASC");

        // Snapshot the rows first; decoding happens outside the lock.
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                let digest: String = row.get(1)?;
                out.push((payload, digest));
            }
            out
        };

        let mut out = Vec::new();
        for (payload, digest) in rows {
            let record = FrameRecord::decode(&payload, &digest)?;
            if query.matches_detections(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn last_frame_number(&self, video_id: &str, camera_id: &str) -> Result<Option<u64>> {
        let conn = self.lock()?;
        let last: Option<i64> = conn
            .query_row(
                "SELECT MAX(frame_number) FROM frame_records WHERE video_id = ?1 AND camera_id = ?2",
                params![video_id, camera_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(last.map(|n| n as u64))
    }
}

#[derive(Clone, Debug)]
struct InMemoryFrameEntry {
    video_id: String,
    camera_id: String,
    frame_number: u64,
    payload_json: String,
    payload_sha256: String,
}

/// Process-local log with the same ordering and integrity rules as the
/// SQLite log.
#[derive(Debug, Default)]
pub struct InMemoryFrameLog {
    entries: Mutex<Vec<InMemoryFrameEntry>>,
}

impl InMemoryFrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<InMemoryFrameEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("in-memory frame log lock poisoned"))
    }

    fn last_in(entries: &[InMemoryFrameEntry], video_id: &str, camera_id: &str) -> Option<u64> {
        entries
            .iter()
            .filter(|e| e.video_id == video_id && e.camera_id == camera_id)
            .map(|e| e.frame_number)
            .max()
    }
}

impl FrameLog for InMemoryFrameLog {
    fn append(&self, record: &FrameRecord) -> Result<()> {
        let (payload_json, payload_sha256) = encode_checked(record)?;
        let mut entries = self.lock()?;
        check_order(
            record,
            Self::last_in(&entries, &record.video_id, &record.camera_id),
        )?;
        entries.push(InMemoryFrameEntry {
            video_id: record.video_id.clone(),
            camera_id: record.camera_id.clone(),
            frame_number: record.frame_number,
            payload_json,
            payload_sha256,
        });
        Ok(())
    }

    fn query(&self, query: &FrameQuery) -> Result<Vec<FrameRecord>> {
        let snapshot = self.lock()?.clone();
        let mut out = Vec::new();
        for entry in snapshot {
            let record = FrameRecord::decode(&entry.payload_json, &entry.payload_sha256)?;
            if query.matches(&record) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| {
            (&a.video_id, a.frame_number, &a.camera_id).cmp(&(&b.video_id, b.frame_number, &b.camera_id))
        });
        Ok(out)
    }

    fn last_frame_number(&self, video_id: &str, camera_id: &str) -> Result<Option<u64>> {
        Ok(Self::last_in(&self.lock()?, video_id, camera_id))
    }
}

/// Retry budget for appends.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * backoff` plus up to half a backoff of
    /// random jitter.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_ms = (self.backoff.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Storage stayed unavailable, or refused the record, after `attempts` tries.
#[derive(Debug)]
pub struct RecordAppendFailure {
    pub video_id: String,
    pub frame_number: u64,
    pub attempts: u32,
    pub last_error: anyhow::Error,
}

impl fmt::Display for RecordAppendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to append frame {} of {} after {} attempt(s): {:#}",
            self.frame_number, self.video_id, self.attempts, self.last_error
        )
    }
}

impl std::error::Error for RecordAppendFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error.as_ref())
    }
}

/// Whether an append error can succeed on retry.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<RecordRejected>().is_some() {
        return false;
    }
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen
        ),
        Some(_) => false,
        None => true,
    }
}

/// Append `record`, retrying transient failures per `policy`.
///
/// A frame is never dropped silently: the caller gets either `Ok` or a
/// `RecordAppendFailure` it must surface.
pub fn append_with_retry(
    log: &dyn FrameLog,
    record: &FrameRecord,
    policy: &RetryPolicy,
) -> std::result::Result<(), RecordAppendFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match log.append(record) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= max_attempts || !is_transient(&err) {
                    return Err(RecordAppendFailure {
                        video_id: record.video_id.clone(),
                        frame_number: record.frame_number,
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.delay(attempt);
                log::warn!(
                    "append of frame {} for {} failed (attempt {}/{}), retrying in {:?}: {:#}",
                    record.frame_number,
                    record.video_id,
                    attempt,
                    max_attempts,
                    delay,
                    err
                );
                std::thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;
    use crate::geometry::BoundingBox;
    use crate::query::DetectionPredicate;
    use crate::record::Detection;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(camera: &str, frame_number: u64, class: ObjectClass) -> FrameRecord {
        FrameRecord {
            video_id: camera.to_string(),
            camera_id: camera.to_string(),
            frame_number,
            frame_timestamp: frame_number as f64 / 30.0,
            captured_at_ms: 1_000 + frame_number,
            detections: vec![Detection {
                object_id: Uuid::new_v4(),
                class,
                confidence: 0.5,
                bounding_box: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
                attributes: Default::default(),
                track_id: None,
            }],
        }
    }

    fn exercise(log: &dyn FrameLog) -> Result<()> {
        assert_eq!(log.last_frame_number("a", "a")?, None);
        log.append(&record("b", 0, ObjectClass::Car))?;
        log.append(&record("a", 0, ObjectClass::Person))?;
        log.append(&record("a", 3, ObjectClass::Car))?;
        log.append(&record("a", 4, ObjectClass::Person))?;
        assert_eq!(log.last_frame_number("a", "a")?, Some(4));

        let err = log.append(&record("a", 4, ObjectClass::Person)).unwrap_err();
        assert!(err.downcast_ref::<RecordRejected>().is_some());

        let all = log.query(&FrameQuery::all())?;
        let keys: Vec<(String, u64)> = all
            .iter()
            .map(|r| (r.video_id.clone(), r.frame_number))
            .collect();
        assert_eq!(
            keys,
            vec![("a".into(), 0), ("a".into(), 3), ("a".into(), 4), ("b".into(), 0)]
        );

        let persons = log.query(&FrameQuery::for_camera("a").with_detection(DetectionPredicate {
            class: Some(ObjectClass::Person),
            ..DetectionPredicate::default()
        }))?;
        assert_eq!(persons.iter().map(|r| r.frame_number).collect::<Vec<_>>(), vec![0, 4]);

        let windowed = log.query(&FrameQuery {
            captured_from_ms: Some(1_003),
            captured_to_ms: Some(1_004),
            ..FrameQuery::default()
        })?;
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].frame_number, 3);

        let mut nan_box = record("a", 5, ObjectClass::Person);
        nan_box.detections[0].bounding_box.x_min = f32::NAN;
        let err = log.append(&nan_box).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecordRejected>(),
            Some(RecordRejected::Invalid(_))
        ));
        assert_eq!(log.last_frame_number("a", "a")?, Some(4));
        assert_eq!(log.query(&FrameQuery::all())?.len(), 4);
        Ok(())
    }

    #[test]
    fn in_memory_log_semantics() -> Result<()> {
        exercise(&InMemoryFrameLog::new())
    }

    #[test]
    fn sqlite_log_semantics() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("frames.db");
        exercise(&SqliteFrameLog::open(path.to_str().unwrap())?)
    }

    #[test]
    fn sqlite_detects_tampered_payload() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("frames.db");
        let log = SqliteFrameLog::open(path.to_str().unwrap())?;
        log.append(&record("a", 0, ObjectClass::Person))?;
        {
            let conn = log.lock()?;
            conn.execute(
                "UPDATE frame_records SET payload_json = replace(payload_json, 'person', 'car')",
                [],
            )?;
        }
        assert!(log.query(&FrameQuery::all()).is_err());
        Ok(())
    }

    struct FlakyLog {
        failures_left: AtomicU32,
        calls: AtomicU32,
        inner: InMemoryFrameLog,
    }

    impl FrameLog for FlakyLog {
        fn append(&self, record: &FrameRecord) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("storage unavailable"));
            }
            self.inner.append(record)
        }

        fn query(&self, query: &FrameQuery) -> Result<Vec<FrameRecord>> {
            self.inner.query(query)
        }

        fn last_frame_number(&self, video_id: &str, camera_id: &str) -> Result<Option<u64>> {
            self.inner.last_frame_number(video_id, camera_id)
        }
    }

    fn flaky(failures: u32) -> FlakyLog {
        FlakyLog {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            inner: InMemoryFrameLog::new(),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn retry_recovers_from_transient_failures() -> Result<()> {
        let log = flaky(2);
        append_with_retry(&log, &record("a", 0, ObjectClass::Person), &fast_policy(5))?;
        assert_eq!(log.calls.load(Ordering::SeqCst), 3);
        assert_eq!(log.inner.len()?, 1);
        Ok(())
    }

    #[test]
    fn retry_budget_exhaustion_is_surfaced() {
        let log = flaky(10);
        let failure =
            append_with_retry(&log, &record("a", 0, ObjectClass::Person), &fast_policy(3)).unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.to_string().contains("storage unavailable"));
    }

    #[test]
    fn rejected_records_are_not_retried() -> Result<()> {
        let log = flaky(0);
        log.append(&record("a", 5, ObjectClass::Person))?;
        let failure =
            append_with_retry(&log, &record("a", 5, ObjectClass::Person), &fast_policy(5)).unwrap_err();
        assert_eq!(failure.attempts, 1);
        Ok(())
    }
}
